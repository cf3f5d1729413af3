//! Device-scope constraints.
//!
//! `on-store`/`on-brand`/`on-model` restrict where a rule entry or a
//! revision-authority delegation applies. They are checked against the
//! device's model assertion and, for store membership, optionally against
//! a store assertion naming friendly stores.

use std::collections::BTreeMap;

use thiserror::Error;

use assertd_types::HeaderValue;

use crate::model::ModelDetails;
use crate::store_assert::StoreDetails;

/// The compiled `on-store`/`on-brand`/`on-model` constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceScopeConstraint {
    /// Stores the device must be scoped to.
    pub store: Vec<String>,
    /// Brand accounts the device must belong to.
    pub brand: Vec<String>,
    /// `brand-id/model` entries the device must match.
    pub model: Vec<String>,
}

/// Device-scope check failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceScopeError {
    /// The device's store is not in the `on-store` set.
    #[error("on-store mismatch")]
    StoreMismatch,
    /// The device's brand is not in the `on-brand` set.
    #[error("on-brand mismatch")]
    BrandMismatch,
    /// The device's model is not in the `on-model` set.
    #[error("on-model mismatch")]
    ModelMismatch,
}

impl DeviceScopeConstraint {
    /// Whether no field constrains anything.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty() && self.brand.is_empty() && self.model.is_empty()
    }

    /// Checks the constraint against a device's model and an optional
    /// store assertion.
    ///
    /// `on-store` matches either the model's own store or, when a store
    /// assertion for that store is given, any of its friendly stores.
    pub fn check(
        &self,
        model: &ModelDetails,
        store: Option<&StoreDetails>,
    ) -> Result<(), DeviceScopeError> {
        if !self.store.is_empty() {
            let model_store = model.store.as_deref().unwrap_or("");
            let mut matched = self.store.iter().any(|s| s == model_store);
            if !matched {
                if let Some(st) = store {
                    if st.store == model_store {
                        matched = st
                            .friendly_stores
                            .iter()
                            .any(|friendly| self.store.iter().any(|s| s == friendly));
                    }
                }
            }
            if !matched {
                return Err(DeviceScopeError::StoreMismatch);
            }
        }
        if !self.brand.is_empty() && !self.brand.iter().any(|b| b == &model.brand_id) {
            return Err(DeviceScopeError::BrandMismatch);
        }
        if !self.model.is_empty() {
            let qualified = format!("{}/{}", model.brand_id, model.model);
            if !self.model.iter().any(|m| m == &qualified) {
                return Err(DeviceScopeError::ModelMismatch);
            }
        }
        Ok(())
    }
}

/// Compiles the device-scope keys out of a constraint map; `context`
/// names the enclosing stanza for error messages.
pub(crate) fn compile_device_scope(
    context: &str,
    map: &BTreeMap<String, HeaderValue>,
) -> Result<Option<DeviceScopeConstraint>, String> {
    let mut scope = DeviceScopeConstraint::default();
    for (key, field) in [
        ("on-store", &mut scope.store),
        ("on-brand", &mut scope.brand),
        ("on-model", &mut scope.model),
    ] {
        if let Some(v) = map.get(key) {
            *field = v
                .as_string_list()
                .ok_or_else(|| format!("{key} in {context} must be a list of strings"))?;
        }
    }
    if scope.is_empty() {
        Ok(None)
    } else {
        Ok(Some(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(brand: &str, name: &str, store: Option<&str>) -> ModelDetails {
        ModelDetails {
            series: "16".into(),
            brand_id: brand.into(),
            model: name.into(),
            store: store.map(str::to_string),
            architecture: "amd64".into(),
            kernel: Some("krnl".into()),
            gadget: Some("gadget".into()),
            base: None,
            timestamp: assertd_types::time::parse_rfc3339("2018-09-12T12:00:00Z").unwrap(),
        }
    }

    fn substore(name: &str, friendly: &[&str]) -> StoreDetails {
        StoreDetails {
            store: name.into(),
            operator_id: "canonical".into(),
            friendly_stores: friendly.iter().map(|s| s.to_string()).collect(),
            timestamp: assertd_types::time::parse_rfc3339("2018-09-12T12:00:00Z").unwrap(),
        }
    }

    #[test]
    fn on_store_against_model_store() {
        let scope = DeviceScopeConstraint {
            store: vec!["substore".into()],
            ..Default::default()
        };
        scope.check(&model("my-brand", "my-model", Some("substore")), None).unwrap();
        assert_eq!(
            scope.check(&model("my-brand", "my-model", Some("other-store")), None),
            Err(DeviceScopeError::StoreMismatch)
        );
    }

    #[test]
    fn on_store_through_friendly_stores() {
        let scope = DeviceScopeConstraint {
            store: vec!["a-store".into()],
            ..Default::default()
        };
        let m = model("my-brand", "my-model", Some("substore"));
        let st = substore("substore", &["a-store", "store1", "store2"]);
        assert_eq!(scope.check(&m, None), Err(DeviceScopeError::StoreMismatch));
        scope.check(&m, Some(&st)).unwrap();

        // the store assertion only vouches for the model's own store
        let unrelated = substore("different", &["a-store"]);
        assert_eq!(
            scope.check(&m, Some(&unrelated)),
            Err(DeviceScopeError::StoreMismatch)
        );
    }

    #[test]
    fn on_brand_and_on_model() {
        let scope = DeviceScopeConstraint {
            brand: vec!["my-brand".into()],
            model: vec!["my-brand/my-model".into()],
            ..Default::default()
        };
        scope.check(&model("my-brand", "my-model", None), None).unwrap();
        assert_eq!(
            scope.check(&model("other-brand", "my-model", None), None),
            Err(DeviceScopeError::BrandMismatch)
        );
        let scope = DeviceScopeConstraint {
            model: vec!["my-brand/other".into()],
            ..Default::default()
        };
        assert_eq!(
            scope.check(&model("my-brand", "my-model", None), None),
            Err(DeviceScopeError::ModelMismatch)
        );
    }

    #[test]
    fn compile_rejects_non_lists() {
        let mut m = BTreeMap::new();
        m.insert("on-store".to_string(), HeaderValue::Str("foo".into()));
        let err = compile_device_scope("revision-authority", &m).unwrap_err();
        assert_eq!(err, "on-store in revision-authority must be a list of strings");
    }
}
