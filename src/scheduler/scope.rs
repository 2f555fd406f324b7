//! Scope derivation for test item identifiers.

/// Determine the scope (grouping key) of an item identifier.
///
/// The usual shapes of an identifier are:
///
/// ```text
/// example/suite/test_beta.py::test_beta0
/// example/suite/test_delta.py::Delta1::test_delta0
/// example/suite/epsilon/__init__.py::epsilon.epsilon
/// ```
///
/// The scope is everything before the rightmost `::`, so functions and
/// doctests group under their module while all methods of one class stay
/// together as `module::Class`. An identifier without a `::` is its own
/// scope. Pure and total: every identifier maps to exactly one scope.
pub fn split_scope(item: &str) -> &str {
    match item.rsplit_once("::") {
        Some((scope, _)) => scope,
        None => item,
    }
}
