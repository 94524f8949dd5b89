use image::RgbImage;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A loaded detection model.
///
/// Implementations are constructed once at startup and shared read-only
/// between concurrent requests, hence `&self` and the `Send + Sync` bound.
/// Any interior mutability a runtime needs is the implementation's business.
pub trait Detector: Send + Sync {
    /// Human-readable model family, reported by the health endpoint.
    fn model_name(&self) -> &str;

    /// Run inference on a decoded RGB image.
    fn detect(&self, image: &RgbImage) -> anyhow::Result<RawDetections>;
}

/// One row of the model's tabular output, in original image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    pub class: f32,
    pub name: Option<String>,
}

/// Raw model result. `table` is `None` when the model produced no tabular
/// projection at all, which downstream treats like an empty table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub table: Option<Vec<TableRow>>,
}

impl RawDetections {
    pub fn from_rows(rows: Vec<TableRow>) -> Self {
        Self { table: Some(rows) }
    }

    pub fn unavailable() -> Self {
        Self { table: None }
    }

    pub fn len(&self) -> usize {
        self.table.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fail unless `wanted` is one of the model's declared tensor names.
pub fn ensure_named(kind: &str, wanted: &str, available: &[&str]) -> anyhow::Result<()> {
    if available.contains(&wanted) {
        return Ok(());
    }
    anyhow::bail!("model has no {kind} named {wanted:?} (available: {available:?})")
}

/// A panic during one inference leaves the runtime state intact: buffers are
/// fully rewritten on every call. Take the lock regardless of poisoning.
pub fn lock_runtime<T>(runtime: &Mutex<T>) -> MutexGuard<'_, T> {
    runtime.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ensure_named_accepts_declared_name() {
        assert!(ensure_named("output", "output0", &["output0"]).is_ok());
    }

    #[test]
    fn test_ensure_named_lists_available_names() {
        let err = ensure_named("output", "output0", &["output"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"output0\""), "{message}");
        assert!(message.contains("[\"output\"]"), "{message}");
    }

    #[test]
    fn test_lock_survives_panicked_holder() {
        let runtime = Arc::new(Mutex::new(0u32));

        let poisoner = Arc::clone(&runtime);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("inference blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(runtime.is_poisoned());

        *lock_runtime(&runtime) += 1;
        *lock_runtime(&runtime) += 1;
        assert_eq!(*lock_runtime(&runtime), 2);
    }
}
