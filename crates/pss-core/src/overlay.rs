//! Overlay contract consumed by the dispatcher.
//!
//! PSS does not route by itself. It asks the overlay (a Kademlia table or
//! anything with the same notion of address distance) whether the local node
//! is a plausible terminal recipient for a recipient hint.

/// Capability advertised by peers that run PSS
pub const PSS_CAPABILITY: &str = "pss";

/// View of the routing overlay
pub trait Overlay: Send + Sync {
    /// This node's overlay address
    fn base_address(&self) -> &[u8];

    /// True if no known peer advertising `capability` is closer to `address`
    /// than this node.
    fn is_closest_to(&self, address: &[u8], capability: &str) -> bool;

    /// Proximity order at which peers count as the local neighbourhood
    fn neighbourhood_depth(&self) -> usize;
}

/// Number of leading bits `a` and `b` share, compared over the shorter of
/// the two.
#[must_use]
pub fn proximity_order(a: &[u8], b: &[u8]) -> usize {
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let diff = x ^ y;
        if diff != 0 {
            return i * 8 + diff.leading_zeros() as usize;
        }
    }
    a.len().min(b.len()) * 8
}

/// True if `hint` is a byte prefix of `address`. An empty hint matches
/// every address.
#[must_use]
pub fn is_prefix_of(hint: &[u8], address: &[u8]) -> bool {
    address.starts_with(hint)
}
