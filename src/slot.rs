use crate::error::Result;

/// Something that holds on to resources owned by a context `C` and must hand them
/// back before it can be forgotten.
pub trait Resource<C: ?Sized> {
    fn release(self, ctx: &mut C) -> Result<()>;
}

/// Holds at most one live resource. Replacing it always releases the old one first,
/// so two instances are never alive at the same time.
#[derive(Debug)]
pub struct ResourceSlot<R> {
    held: Option<R>,
}

impl<R> ResourceSlot<R> {
    pub fn empty() -> Self {
        Self { held: None }
    }

    pub fn get(&self) -> Option<&R> {
        self.held.as_ref()
    }

    pub fn is_occupied(&self) -> bool {
        self.held.is_some()
    }

    /// Releases the current resource (if any), then builds a new one. If `build`
    /// fails the slot stays empty.
    pub fn replace<C, F>(&mut self, ctx: &mut C, build: F) -> Result<&R>
    where
        C: ?Sized,
        R: Resource<C>,
        F: FnOnce(&mut C) -> Result<R>,
    {
        self.release(ctx)?;
        let resource = build(ctx)?;
        Ok(self.held.insert(resource))
    }

    pub fn release<C: ?Sized>(&mut self, ctx: &mut C) -> Result<()>
    where
        R: Resource<C>,
    {
        match self.held.take() {
            Some(old) => old.release(ctx),
            None => Ok(()),
        }
    }
}

impl<R> Default for ResourceSlot<R> {
    fn default() -> Self {
        Self::empty()
    }
}
