//! Metadata — the ordered key-value mapping attached to a block.

use indexmap::IndexMap;
use super::MetaValue;

/// A block's metadata, in insertion order.
pub type Metadata = IndexMap<String, MetaValue>;

/// Collect (key, value) pairs into a map value.
impl<K, V> FromIterator<(K, V)> for MetaValue
where
    K: Into<String>,
    V: Into<MetaValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(pairs: I) -> Self {
        MetaValue::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Build a [`Metadata`] from `key => value` pairs, keeping their order.
///
/// ```
/// use memblock::{metadata, MetaValue};
///
/// let m = metadata! { "priority" => 1, "done" => false };
/// assert_eq!(m["done"], MetaValue::Bool(false));
/// ```
#[macro_export]
macro_rules! metadata {
    () => { $crate::Metadata::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut m = $crate::Metadata::new();
        $( m.insert(::std::string::String::from($key), $crate::MetaValue::from($value)); )+
        m
    }};
}
