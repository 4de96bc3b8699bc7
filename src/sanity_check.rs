/// Define a trait that performs sanity checks on a decoded on-disk
/// structure, beyond what the parser itself can reject
pub trait SanityCheck {
    /// Perform a set of data-dependent sanity checks on a structure
    /// Returns true if the object passes the checks
    /// Return false if the object fails the tests
    fn check(&self) -> bool;
}
