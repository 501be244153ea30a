//! Diff engine
//!
//! Compares two lazily listed URL trees with a streaming sorted-merge-join.
//! Both inputs must be recursive listings in lexicographic key order; one
//! DiffEntry is emitted per key without materializing either tree. Only
//! size, type and modification time are compared, never content.

use serde::Serializer;
use tokio::sync::mpsc;

use crate::client::Entry;
use crate::error::Result;

const CHANNEL_CAP: usize = 1000;

/// Per-key difference classification.
///
/// The numeric codes are wire-stable; JSON output serializes the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiffKind {
    None = 0,
    Size = 1,
    Metadata = 2,
    Type = 3,
    OnlyInFirst = 4,
    OnlyInSecond = 5,
}

impl DiffKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Single-character legend: `<` only in first, `>` only in second,
    /// `!` differs, `=` same.
    pub const fn legend(self) -> char {
        match self {
            DiffKind::None => '=',
            DiffKind::Size | DiffKind::Metadata | DiffKind::Type => '!',
            DiffKind::OnlyInFirst => '<',
            DiffKind::OnlyInSecond => '>',
        }
    }
}

impl serde::Serialize for DiffKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One classified key difference between the two trees.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiffEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    pub kind: DiffKind,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Also emit keys that do not differ.
    pub include_same: bool,
}

/// Merge-join two ordered entry streams into a stream of differences.
///
/// Entry-level errors from either side are forwarded and that side keeps
/// being consumed; a failed entry never aborts the whole comparison.
pub fn diff_trees(
    mut first: mpsc::Receiver<Result<Entry>>,
    mut second: mpsc::Receiver<Result<Entry>>,
    options: DiffOptions,
) -> mpsc::Receiver<Result<DiffEntry>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAP);

    tokio::spawn(async move {
        let mut first_entry = first.recv().await;
        let mut second_entry = second.recv().await;

        loop {
            match (&first_entry, &second_entry) {
                (None, None) => return,

                (Some(Err(_)), _) => {
                    if let Some(Err(e)) = first_entry.take()
                        && tx.send(Err(e)).await.is_err()
                    {
                        return;
                    }
                    first_entry = first.recv().await;
                }
                (_, Some(Err(_))) => {
                    if let Some(Err(e)) = second_entry.take()
                        && tx.send(Err(e)).await.is_err()
                    {
                        return;
                    }
                    second_entry = second.recv().await;
                }

                (None, Some(Ok(entry))) => {
                    let diff = DiffEntry {
                        first: None,
                        second: Some(entry.key.clone()),
                        kind: DiffKind::OnlyInSecond,
                    };
                    if tx.send(Ok(diff)).await.is_err() {
                        return;
                    }
                    second_entry = second.recv().await;
                }
                (Some(Ok(entry)), None) => {
                    let diff = DiffEntry {
                        first: Some(entry.key.clone()),
                        second: None,
                        kind: DiffKind::OnlyInFirst,
                    };
                    if tx.send(Ok(diff)).await.is_err() {
                        return;
                    }
                    first_entry = first.recv().await;
                }

                (Some(Ok(left)), Some(Ok(right))) => {
                    if left.key < right.key {
                        let diff = DiffEntry {
                            first: Some(left.key.clone()),
                            second: None,
                            kind: DiffKind::OnlyInFirst,
                        };
                        if tx.send(Ok(diff)).await.is_err() {
                            return;
                        }
                        first_entry = first.recv().await;
                    } else if left.key > right.key {
                        let diff = DiffEntry {
                            first: None,
                            second: Some(right.key.clone()),
                            kind: DiffKind::OnlyInSecond,
                        };
                        if tx.send(Ok(diff)).await.is_err() {
                            return;
                        }
                        second_entry = second.recv().await;
                    } else {
                        let kind = classify(left, right);
                        if kind != DiffKind::None || options.include_same {
                            let diff = DiffEntry {
                                first: Some(left.key.clone()),
                                second: Some(right.key.clone()),
                                kind,
                            };
                            if tx.send(Ok(diff)).await.is_err() {
                                return;
                            }
                        }
                        first_entry = first.recv().await;
                        second_entry = second.recv().await;
                    }
                }
            }
        }
    });

    rx
}

fn classify(first: &Entry, second: &Entry) -> DiffKind {
    if first.is_dir != second.is_dir {
        return DiffKind::Type;
    }
    if first.is_dir {
        return DiffKind::None;
    }
    if first.size != second.size {
        return DiffKind::Size;
    }
    if let (Some(first_time), Some(second_time)) = (first.modified, second.modified)
        && first_time > second_time
    {
        return DiffKind::Metadata;
    }
    DiffKind::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    async fn feed(entries: Vec<Result<Entry>>) -> mpsc::Receiver<Result<Entry>> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for entry in entries {
                if tx.send(entry).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn collect(mut rx: mpsc::Receiver<Result<DiffEntry>>) -> Vec<Result<DiffEntry>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(DiffKind::None.code(), 0);
        assert_eq!(DiffKind::Size.code(), 1);
        assert_eq!(DiffKind::Metadata.code(), 2);
        assert_eq!(DiffKind::Type.code(), 3);
        assert_eq!(DiffKind::OnlyInFirst.code(), 4);
        assert_eq!(DiffKind::OnlyInSecond.code(), 5);
    }

    #[test]
    fn test_legend_convention() {
        assert_eq!(DiffKind::OnlyInFirst.legend(), '<');
        assert_eq!(DiffKind::OnlyInSecond.legend(), '>');
        assert_eq!(DiffKind::Size.legend(), '!');
    }

    #[tokio::test]
    async fn test_size_and_only_in_second() {
        let first = feed(vec![Ok(Entry::file("a", 10))]).await;
        let second = feed(vec![Ok(Entry::file("a", 20)), Ok(Entry::file("b", 5))]).await;

        let results = collect(diff_trees(first, second, DiffOptions::default())).await;
        let results: Vec<DiffEntry> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(
            results,
            vec![
                DiffEntry {
                    first: Some("a".to_string()),
                    second: Some("a".to_string()),
                    kind: DiffKind::Size,
                },
                DiffEntry {
                    first: None,
                    second: Some("b".to_string()),
                    kind: DiffKind::OnlyInSecond,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_only_in_first_and_same_suppressed() {
        let first = feed(vec![Ok(Entry::file("a", 10)), Ok(Entry::file("b", 1))]).await;
        let second = feed(vec![Ok(Entry::file("a", 10))]).await;

        let results = collect(diff_trees(first, second, DiffOptions::default())).await;
        let results: Vec<DiffEntry> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, DiffKind::OnlyInFirst);
        assert_eq!(results[0].first.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_include_same_emits_matches() {
        let first = feed(vec![Ok(Entry::file("a", 10))]).await;
        let second = feed(vec![Ok(Entry::file("a", 10))]).await;

        let options = DiffOptions { include_same: true };
        let results = collect(diff_trees(first, second, options)).await;
        assert_eq!(results[0].as_ref().unwrap().kind, DiffKind::None);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let first = feed(vec![Ok(Entry::file("x", 10))]).await;
        let second = feed(vec![Ok(Entry::dir("x"))]).await;

        let results = collect(diff_trees(first, second, DiffOptions::default())).await;
        assert_eq!(results[0].as_ref().unwrap().kind, DiffKind::Type);
    }

    #[tokio::test]
    async fn test_newer_first_is_metadata_difference() {
        let older = jiff::Timestamp::from_second(1_700_000_000).unwrap();
        let newer = jiff::Timestamp::from_second(1_700_000_100).unwrap();

        let mut src = Entry::file("a", 10);
        src.modified = Some(newer);
        let mut dst = Entry::file("a", 10);
        dst.modified = Some(older);

        let first = feed(vec![Ok(src)]).await;
        let second = feed(vec![Ok(dst)]).await;

        let results = collect(diff_trees(first, second, DiffOptions::default())).await;
        assert_eq!(results[0].as_ref().unwrap().kind, DiffKind::Metadata);
    }

    #[tokio::test]
    async fn test_entry_error_does_not_abort_stream() {
        let first = feed(vec![
            Ok(Entry::file("a", 1)),
            Err(Error::General("transient list failure".to_string())),
            Ok(Entry::file("z", 1)),
        ])
        .await;
        let second = feed(vec![Ok(Entry::file("a", 1))]).await;

        let results = collect(diff_trees(first, second, DiffOptions::default())).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        let last = results[1].as_ref().unwrap();
        assert_eq!(last.kind, DiffKind::OnlyInFirst);
        assert_eq!(last.first.as_deref(), Some("z"));
    }

    #[tokio::test]
    async fn test_json_serializes_numeric_code() {
        let entry = DiffEntry {
            first: Some("a".to_string()),
            second: None,
            kind: DiffKind::OnlyInFirst,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":4"));
        assert!(!json.contains("second"));
    }
}
