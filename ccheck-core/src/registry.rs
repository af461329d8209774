//! The provider registry: datasets grouped by the type name they provide
//! (spec §3, §4.3).
//!
//! Built single-threaded while providers load, then handed to worker
//! threads behind an `Arc` and never mutated again — there is no locking
//! anywhere in this module because none is needed once loading finishes.

use std::collections::HashMap;
use std::os::raw::{c_char, c_void};

use crate::error::RegistryError;

/// A provider's formatting function: `format_<munged type>` from spec §4.2.
pub type FormatFn = unsafe extern "C" fn(*mut c_char, usize, *const c_void) -> usize;

/// One loaded provider's dataset.
pub struct Dataset {
    pub source_module: String,
    pub name: String,
    pub count: usize,
    buffer: Box<[u8]>,
    pub format: FormatFn,
}

impl Dataset {
    pub fn new(
        source_module: String,
        name: String,
        count: usize,
        buffer: Box<[u8]>,
        format: FormatFn,
    ) -> Self {
        Dataset {
            source_module,
            name,
            count,
            buffer,
            format,
        }
    }

    /// A pointer to element `index` of this dataset, given the owning
    /// bucket's element size. Mirrors `locateArg()`.
    pub fn element_ptr(&self, element_size: usize, index: usize) -> *const u8 {
        debug_assert!(index < self.count);
        // SAFETY: `index < self.count` and `self.buffer.len() ==
        // self.count * element_size` (enforced at construction in the
        // loader), so this stays within `self.buffer`.
        unsafe { self.buffer.as_ptr().add(element_size * index) }
    }
}

/// Every dataset registered for one provided type.
pub struct ProviderBucket {
    pub type_name: String,
    pub element_size: usize,
    pub datasets: Vec<Dataset>,
}

/// All providers, grouped by type name.
#[derive(Default)]
pub struct Registry {
    buckets: HashMap<String, ProviderBucket>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            buckets: HashMap::new(),
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&ProviderBucket> {
        self.buckets.get(type_name)
    }

    /// Adds `dataset` to the bucket for `type_name`, creating it if this is
    /// the first provider of that type. Rejects the dataset if an existing
    /// bucket for the same type disagrees on `element_size`.
    pub fn insert(
        &mut self,
        type_name: &str,
        element_size: usize,
        dataset: Dataset,
    ) -> Result<(), RegistryError> {
        match self.buckets.get_mut(type_name) {
            Some(bucket) => {
                if bucket.element_size != element_size {
                    return Err(RegistryError::ElementSizeMismatch {
                        type_name: type_name.to_string(),
                        expected: bucket.element_size,
                        got: element_size,
                    });
                }
                bucket.datasets.push(dataset);
            }
            None => {
                self.buckets.insert(
                    type_name.to_string(),
                    ProviderBucket {
                        type_name: type_name.to_string(),
                        element_size,
                        datasets: vec![dataset],
                    },
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn dummy_format(_to: *mut c_char, _n: usize, _data: *const c_void) -> usize {
        0
    }

    fn dataset(source_module: &str, name: &str, count: usize, element_size: usize) -> Dataset {
        Dataset::new(
            source_module.to_string(),
            name.to_string(),
            count,
            vec![0u8; count * element_size].into_boxed_slice(),
            dummy_format,
        )
    }

    #[test]
    fn first_insert_creates_the_bucket() {
        let mut registry = Registry::new();
        registry
            .insert("uint16_t", 2, dataset("mod", "fixed", 30, 2))
            .unwrap();

        let bucket = registry.get("uint16_t").unwrap();
        assert_eq!(bucket.element_size, 2);
        assert_eq!(bucket.datasets.len(), 1);
    }

    #[test]
    fn second_insert_with_matching_size_extends_the_bucket() {
        let mut registry = Registry::new();
        registry
            .insert("uint16_t", 2, dataset("mod", "fixed", 30, 2))
            .unwrap();
        registry
            .insert("uint16_t", 2, dataset("mod", "random", 50, 2))
            .unwrap();

        assert_eq!(registry.get("uint16_t").unwrap().datasets.len(), 2);
    }

    #[test]
    fn mismatched_element_size_is_rejected() {
        let mut registry = Registry::new();
        registry
            .insert("uint16_t", 2, dataset("mod", "fixed", 30, 2))
            .unwrap();

        let err = registry
            .insert("uint16_t", 4, dataset("other", "bogus", 10, 4))
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::ElementSizeMismatch {
                expected: 2,
                got: 4,
                ..
            }
        ));
        assert_eq!(registry.get("uint16_t").unwrap().datasets.len(), 1);
    }

    #[test]
    fn unknown_type_returns_none() {
        let registry = Registry::new();
        assert!(registry.get("nonexistent").is_none());
    }
}
