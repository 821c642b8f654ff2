use std::fmt;

/// A protocol object tied to one frame request.
///
/// Identity is by `PartialEq`: two values are equal when they name the same
/// protocol object.
pub trait FrameObject: PartialEq + fmt::Debug {
    /// Release the protocol-side resources. Called at most once per object.
    fn release(&self);
}

/// Owns a [`FrameObject`] and releases it exactly once, either explicitly or
/// on drop.
#[derive(Debug)]
pub struct FrameLease<F: FrameObject> {
    object: Option<F>,
}

impl<F: FrameObject> FrameLease<F> {
    pub fn new(object: F) -> Self {
        Self { object: Some(object) }
    }

    pub fn object(&self) -> Option<&F> {
        self.object.as_ref()
    }

    pub fn matches(&self, other: &F) -> bool {
        self.object.as_ref().is_some_and(|o| o == other)
    }

    pub fn is_released(&self) -> bool {
        self.object.is_none()
    }

    pub fn release(&mut self) {
        if let Some(object) = self.object.take() {
            object.release();
        }
    }
}

impl<F: FrameObject> Drop for FrameLease<F> {
    fn drop(&mut self) {
        self.release();
    }
}
