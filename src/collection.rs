//! Collection mismatch detection and reporting.
//!
//! Every worker reports the ordered list of item identifiers it discovered.
//! Before trusting any of them, the scheduler compares each collection to the
//! first one reported and surfaces any difference as a unified diff. A
//! mismatch is deliberately soft: it is reported, and the run proceeds with
//! the first reporter's collection as canonical.

use std::fmt::Write as FmtWrite;

use similar::TextDiff;

use crate::worker::NodeId;

/// Host-facing sink for collection mismatch reports.
///
/// When no reporter is installed the scheduler falls back to a tracing
/// warning with the same content.
pub trait CollectionReporter {
    fn report_collection_mismatch(&mut self, first: NodeId, other: NodeId, diff: &str);
}

/// Compare two node collections and describe any difference.
///
/// Returns `None` when the collections are identical, otherwise a unified
/// diff of item identifiers labeled with the two node names.
pub fn report_collection_diff(
    from_collection: &[String],
    to_collection: &[String],
    from_name: &str,
    to_name: &str,
) -> Option<String> {
    if from_collection == to_collection {
        return None;
    }

    let from_text = join_lines(from_collection);
    let to_text = join_lines(to_collection);
    let diff = TextDiff::from_lines(&from_text, &to_text);

    let mut message = format!(
        "Different tests were collected between {from_name} and {to_name}. The difference is:\n"
    );
    let _ = writeln!(message, "--- {from_name}");
    let _ = writeln!(message, "+++ {to_name}");
    for hunk in diff.unified_diff().iter_hunks() {
        let _ = writeln!(message, "{hunk}");
    }
    Some(message)
}

fn join_lines(collection: &[String]) -> String {
    let mut text = String::new();
    for item in collection {
        text.push_str(item);
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_collections_produce_no_diff() {
        let a = items(&["t/a.py::t1", "t/a.py::t2"]);
        assert!(report_collection_diff(&a, &a.clone(), "worker-0", "worker-1").is_none());
    }

    #[test]
    fn mismatch_is_described_with_node_names() {
        let a = items(&["t/a.py::t1", "t/a.py::t2"]);
        let b = items(&["t/a.py::t1", "t/a.py::t3"]);
        let msg = report_collection_diff(&a, &b, "worker-0", "worker-1").unwrap();
        assert!(msg.contains("worker-0"));
        assert!(msg.contains("worker-1"));
        assert!(msg.contains("-t/a.py::t2"));
        assert!(msg.contains("+t/a.py::t3"));
    }

    #[test]
    fn extra_item_shows_as_addition() {
        let a = items(&["t/a.py::t1"]);
        let b = items(&["t/a.py::t1", "t/b.py::t1"]);
        let msg = report_collection_diff(&a, &b, "first", "late").unwrap();
        assert!(msg.contains("+t/b.py::t1"));
    }
}
