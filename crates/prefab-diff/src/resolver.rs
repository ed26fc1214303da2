use prefab_types::{LocalIdPath, Target};

/// Expresses a referenced object as a template-relative address.
///
/// References on the live side and on the template side point at different
/// objects with different identities; two references are equivalent when
/// both resolve to the same address.
pub trait RefResolver {
    /// Address of `target` relative to the compared instance, or `None` when
    /// the target is not template content of that instance.
    fn address_of(&self, target: Target) -> Option<LocalIdPath>;
}

/// Resolver that never produces an address: references compare by identity
/// only.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityOnly;

impl RefResolver for IdentityOnly {
    fn address_of(&self, _target: Target) -> Option<LocalIdPath> {
        None
    }
}
