/// What a store holds under a key.
///
/// `Empty` records a lookup that found nothing in the backing source, so repeated
/// misses are answered from the cache instead of hitting the source again. It is a
/// distinct variant, so no legitimate value can ever be mistaken for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEntry<V> {
    Value(V),
    Empty,
}
