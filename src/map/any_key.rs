//! Type-erased map keys
//!
//! [`AnyKey`] lets a single map hold keys of unrelated types. Two keys are
//! equal only if they have the same concrete type and compare equal as that
//! type; the concrete type's [`TypeId`](core::any::TypeId) is mixed into the
//! hash so that, for example, `1u32` and `1u64` are distinct keys.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

trait DynKey: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn type_name(&self) -> &'static str;
}

impl<T> DynKey for T
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn type_name(&self) -> &'static str {
        core::any::type_name::<T>()
    }
}

/// A key of any hashable type
///
/// Cloning is cheap: the wrapped value is shared.
///
/// # Examples
///
/// ```rust
/// use syncmap::AnyKey;
///
/// let key = AnyKey::new(42u32);
/// assert_eq!(key, AnyKey::from(42u32));
/// assert_ne!(key, AnyKey::from(42u64));
/// assert_eq!(key.downcast_ref::<u32>(), Some(&42));
/// ```
#[derive(Clone)]
pub struct AnyKey {
    inner: Arc<dyn DynKey>,
}

impl AnyKey {
    /// Wrap `key`
    pub fn new<T>(key: T) -> Self
    where
        T: Hash + Eq + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(key),
        }
    }

    /// Borrow the wrapped value if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref()
    }

    /// Whether the wrapped value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.inner.as_any().is::<T>()
    }

    /// Name of the wrapped value's type
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.dyn_eq(&*other.inner)
    }
}

impl Eq for AnyKey {}

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.as_any().type_id().hash(state);
        self.inner.dyn_hash(state);
    }
}

impl fmt::Debug for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyKey").field(&self.type_name()).finish()
    }
}

macro_rules! any_key_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AnyKey {
                fn from(key: $ty) -> Self {
                    AnyKey::new(key)
                }
            }
        )*
    };
}

any_key_from!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String,
    &'static str,
);
