//! a map keyed by type, used for plugin-local context values
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

/// Stores at most one value of each type. Plugins use this to hand
/// values (matched classes, lease expiry, client context) to later
/// stages without the server knowing their types.
#[derive(Default)]
pub struct TypeMap {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMap").field("len", &self.map.len()).finish()
    }
}

impl TypeMap {
    /// empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// insert a value, returning the previous value of that type
    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(val))
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// borrow a value by type
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// mutably borrow a value by type
    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut())
    }

    /// remove a value, returning it
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut map = TypeMap::new();
        assert_eq!(map.insert(1u32), None);
        assert_eq!(map.insert(2u32), Some(1));
        assert_eq!(map.get::<u32>(), Some(&2));
        *map.get_mut::<u32>().unwrap() = 3;
        assert_eq!(map.remove::<u32>(), Some(3));
        assert_eq!(map.get::<u32>(), None);
    }
}
