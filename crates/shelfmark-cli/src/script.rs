//! JSON scripts driving a [`TransactionManager`].
//!
//! A script is a JSON array of steps:
//!
//! ```json
//! [
//!   { "step": "transact", "txn": { "op": "new_folder", "parent": "menu", "title": "Work", "as": "work" } },
//!   { "step": "batch", "txns": [
//!       { "op": "new_bookmark", "parent": "$work", "url": "http://example.com/", "tags": ["a"] },
//!       { "op": "new_separator", "parent": "$work" }
//!   ] },
//!   { "step": "undo" },
//!   { "step": "redo" },
//!   { "step": "clear", "redo": true },
//!   { "step": "snapshot", "guid": "$work" }
//! ]
//! ```
//!
//! Item references are either builtin root names (`root`, `menu`, `toolbar`,
//! `unfiled`), `$name` for a GUID bound earlier with `"as": "name"`, or a
//! literal 12-character GUID.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context as _, Result, anyhow};
use serde::{Deserialize, Serialize};
use shelfmark_core::model::{AnnoValue, BookmarkTree, BookmarkUrl, Guid, InsertIndex};
use shelfmark_core::txn::{
    Annotate, CopyItem, EditKeyword, EditTitle, EditUrl, Move, NewBookmark, NewFolder,
    NewLivemark, NewSeparator, Remove, SortByName, Tag, Transaction, Untag,
};
use shelfmark_core::{BookmarkStore, Outcome, ProgrammingError, TransactionManager, TxnError};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Script format
// ---------------------------------------------------------------------------

/// One line of a script.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Transact {
        txn: TxnSpec,
    },
    Batch {
        txns: Vec<TxnSpec>,
    },
    Undo,
    Redo,
    Clear {
        #[serde(default)]
        undo: bool,
        #[serde(default)]
        redo: bool,
    },
    Snapshot {
        #[serde(default)]
        guid: Option<String>,
    },
}

impl Step {
    const fn name(&self) -> &'static str {
        match self {
            Self::Transact { .. } => "transact",
            Self::Batch { .. } => "batch",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Clear { .. } => "clear",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}

/// A unit description plus an optional name for the GUID it creates.
#[derive(Debug, Clone, Deserialize)]
pub struct TxnSpec {
    #[serde(rename = "as", default)]
    pub bind: Option<String>,
    #[serde(flatten)]
    pub op: OpSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSpec {
    NewFolder {
        parent: String,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        annotations: BTreeMap<String, AnnoValue>,
    },
    NewBookmark {
        parent: String,
        url: String,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        keyword: Option<String>,
        #[serde(default)]
        post_data: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        annotations: BTreeMap<String, AnnoValue>,
    },
    NewSeparator {
        parent: String,
        #[serde(default)]
        index: Option<usize>,
    },
    NewLivemark {
        parent: String,
        feed_url: String,
        #[serde(default)]
        site_url: Option<String>,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        title: Option<String>,
    },
    Remove {
        guid: String,
    },
    Move {
        guid: String,
        parent: String,
        #[serde(default)]
        index: Option<usize>,
    },
    Copy {
        guid: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    EditTitle {
        guid: String,
        title: String,
    },
    EditUrl {
        guid: String,
        url: String,
    },
    EditKeyword {
        guid: String,
        keyword: String,
    },
    /// `null` values remove the annotation.
    Annotate {
        guid: String,
        annotations: BTreeMap<String, Option<AnnoValue>>,
    },
    Tag {
        urls: Vec<String>,
        tags: Vec<String>,
    },
    /// Without `tags`, every tag of the URLs is removed.
    Untag {
        urls: Vec<String>,
        #[serde(default)]
        tags: Option<Vec<String>>,
    },
    Sort {
        folder: String,
    },
}

/// Parse a script from its JSON text.
pub fn parse(text: &str) -> Result<Vec<Step>> {
    serde_json::from_str(text).context("script is not a valid JSON step list")
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl From<&TxnError> for ErrorReport {
    fn from(err: &TxnError) -> Self {
        Self {
            code: err.code().code(),
            message: err.to_string(),
            hint: err.hint(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    NotApplicable,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    pub status: StepStatus,
    /// Factory names of the units involved, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<&'static str>,
    /// GUIDs created by the step, in unit order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<Guid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<BookmarkTree>,
}

impl StepReport {
    const fn new(index: usize, step: &'static str) -> Self {
        Self {
            index,
            step,
            status: StepStatus::Applied,
            kinds: Vec::new(),
            created: Vec::new(),
            error: None,
            tree: None,
        }
    }

    fn failed(mut self, err: &TxnError) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(err.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    pub length: usize,
    pub undo_position: usize,
    /// Unit kinds of every entry, newest first.
    pub entries: Vec<Vec<&'static str>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub history: HistoryReport,
    pub tree: Option<BookmarkTree>,
}

impl RunReport {
    /// Number of steps the engine rejected.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes steps and keeps the `as` bindings between them.
pub struct Runner<'m, S> {
    manager: &'m TransactionManager<S>,
    bindings: HashMap<String, Guid>,
}

impl<'m, S: BookmarkStore> Runner<'m, S> {
    pub fn new(manager: &'m TransactionManager<S>) -> Self {
        Self {
            manager,
            bindings: HashMap::new(),
        }
    }

    /// Run every step. Engine rejections are recorded in the report and do
    /// not stop the script; malformed steps (unknown bindings, bad GUIDs or
    /// URLs) abort it.
    pub fn run(&mut self, steps: &[Step]) -> Result<RunReport> {
        let mut reports = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let report = self
                .run_step(index, step)
                .with_context(|| format!("step {index} ({})", step.name()))?;
            debug!(index, step = step.name(), status = ?report.status, "step finished");
            reports.push(report);
        }
        let report = RunReport {
            steps: reports,
            history: self.history(),
            tree: self.snapshot(&Guid::root())?,
        };
        info!(
            steps = report.steps.len(),
            failed = report.failures(),
            entries = report.history.length,
            "script finished"
        );
        Ok(report)
    }

    fn run_step(&mut self, index: usize, step: &Step) -> Result<StepReport> {
        let mut report = StepReport::new(index, step.name());
        match step {
            Step::Transact { txn } => {
                let built = self.build(&txn.op)?;
                report.kinds.push(built.kind());
                match self.manager.transact(&built) {
                    Ok(created) => self.record(&mut report, txn, created),
                    Err(e) => return Ok(report.failed(&e)),
                }
            }
            Step::Batch { txns } => {
                // Units are built one at a time so `$name` can refer to an
                // item created earlier in the same batch.
                let manager = self.manager;
                let saved = self.bindings.clone();
                let mut malformed = None;
                let result = manager.batch(|stage| {
                    for spec in txns {
                        let built = match self.build(&spec.op) {
                            Ok(built) => built,
                            Err(e) => {
                                let reason = format!("{e:#}");
                                malformed = Some(e);
                                return Err(ProgrammingError::Malformed(reason).into());
                            }
                        };
                        report.kinds.push(built.kind());
                        let created = stage.transact(&built)?;
                        self.record(&mut report, spec, created);
                    }
                    Ok(())
                });
                if let Err(e) = result {
                    self.bindings = saved;
                    report.created.clear();
                    if let Some(cause) = malformed {
                        return Err(cause);
                    }
                    return Ok(report.failed(&e));
                }
            }
            Step::Undo | Step::Redo => {
                let result = if matches!(step, Step::Undo) {
                    self.manager.undo()
                } else {
                    self.manager.redo()
                };
                match result {
                    Ok(Outcome::Applied) => {}
                    Ok(Outcome::NotApplicable) => report.status = StepStatus::NotApplicable,
                    Err(e) => return Ok(report.failed(&e)),
                }
            }
            Step::Clear { undo, redo } => {
                // An empty clear request means "everything".
                let (undo, redo) = if *undo || *redo {
                    (*undo, *redo)
                } else {
                    (true, true)
                };
                if let Err(e) = self.manager.clear(undo, redo) {
                    return Ok(report.failed(&e));
                }
            }
            Step::Snapshot { guid } => {
                let guid = match guid {
                    Some(r) => self.resolve(r)?,
                    None => Guid::root(),
                };
                report.tree = self.snapshot(&guid)?;
                if report.tree.is_none() {
                    report.status = StepStatus::NotApplicable;
                }
            }
        }
        Ok(report)
    }

    fn record(&mut self, report: &mut StepReport, spec: &TxnSpec, created: Option<Guid>) {
        let Some(guid) = created else {
            return;
        };
        if let Some(name) = &spec.bind {
            self.bindings.insert(name.clone(), guid.clone());
        }
        report.created.push(guid);
    }

    fn history(&self) -> HistoryReport {
        HistoryReport {
            length: self.manager.length(),
            undo_position: self.manager.undo_position(),
            entries: self
                .manager
                .entries()
                .iter()
                .map(|e| e.units().iter().map(Transaction::kind).collect())
                .collect(),
        }
    }

    fn snapshot(&self, guid: &Guid) -> Result<Option<BookmarkTree>> {
        self.manager
            .inspect(|s| s.snapshot_tree(guid))
            .map_err(|e| anyhow!(e))
    }

    // -----------------------------------------------------------------------
    // Building units
    // -----------------------------------------------------------------------

    fn resolve(&self, reference: &str) -> Result<Guid> {
        if let Some(name) = reference.strip_prefix('$') {
            return self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("unknown binding ${name}"));
        }
        Ok(match reference {
            "root" => Guid::root(),
            "menu" => Guid::menu(),
            "toolbar" => Guid::toolbar(),
            "unfiled" => Guid::unfiled(),
            literal => literal.parse()?,
        })
    }

    fn build(&self, op: &OpSpec) -> Result<Transaction> {
        let txn = match op {
            OpSpec::NewFolder {
                parent,
                index,
                title,
                annotations,
            } => {
                let mut input = NewFolder::new(self.resolve(parent)?).at(insert_index(*index));
                if let Some(title) = title {
                    input = input.title(title.clone());
                }
                for (name, value) in annotations {
                    input = input.annotation(name.clone(), value.clone());
                }
                input.into()
            }
            OpSpec::NewBookmark {
                parent,
                url: raw,
                index,
                title,
                keyword,
                post_data,
                tags,
                annotations,
            } => {
                let mut input = NewBookmark::new(self.resolve(parent)?, url(raw)?)
                    .at(insert_index(*index))
                    .tags(tags.iter().cloned());
                if let Some(title) = title {
                    input = input.title(title.clone());
                }
                if let Some(keyword) = keyword {
                    input = input.keyword(keyword.clone());
                }
                if let Some(post_data) = post_data {
                    input = input.post_data(post_data.clone());
                }
                for (name, value) in annotations {
                    input = input.annotation(name.clone(), value.clone());
                }
                input.into()
            }
            OpSpec::NewSeparator { parent, index } => NewSeparator::new(self.resolve(parent)?)
                .at(insert_index(*index))
                .into(),
            OpSpec::NewLivemark {
                parent,
                feed_url,
                site_url,
                index,
                title,
            } => {
                let mut input = NewLivemark::new(self.resolve(parent)?, url(feed_url)?)
                    .at(insert_index(*index));
                if let Some(site) = site_url {
                    input = input.site_url(url(site)?);
                }
                if let Some(title) = title {
                    input = input.title(title.clone());
                }
                input.into()
            }
            OpSpec::Remove { guid } => Remove::new(self.resolve(guid)?).into(),
            OpSpec::Move {
                guid,
                parent,
                index,
            } => Move::new(self.resolve(guid)?, self.resolve(parent)?)
                .at(insert_index(*index))
                .into(),
            OpSpec::Copy {
                guid,
                parent,
                index,
            } => {
                let mut input = CopyItem::new(self.resolve(guid)?).at(insert_index(*index));
                if let Some(parent) = parent {
                    input = input.into_folder(self.resolve(parent)?);
                }
                input.into()
            }
            OpSpec::EditTitle { guid, title } => {
                EditTitle::new(self.resolve(guid)?, title.clone()).into()
            }
            OpSpec::EditUrl { guid, url: raw } => {
                EditUrl::new(self.resolve(guid)?, url(raw)?).into()
            }
            OpSpec::EditKeyword { guid, keyword } => {
                EditKeyword::new(self.resolve(guid)?, keyword.clone()).into()
            }
            OpSpec::Annotate { guid, annotations } => {
                let mut input = Annotate::new(self.resolve(guid)?);
                for (name, value) in annotations {
                    input = match value {
                        Some(v) => input.set(name.clone(), v.clone()),
                        None => input.remove(name.clone()),
                    };
                }
                input.into()
            }
            OpSpec::Tag { urls, tags } => Tag::new(parse_urls(urls)?, tags.iter().cloned()).into(),
            OpSpec::Untag { urls, tags } => match tags {
                Some(tags) => Untag::new(parse_urls(urls)?, tags.iter().cloned()).into(),
                None => Untag::all(parse_urls(urls)?).into(),
            },
            OpSpec::Sort { folder } => SortByName::new(self.resolve(folder)?).into(),
        };
        Ok(txn)
    }
}

fn insert_index(index: Option<usize>) -> InsertIndex {
    index.map_or(InsertIndex::Default, InsertIndex::At)
}

fn url(raw: &str) -> Result<BookmarkUrl> {
    BookmarkUrl::parse(raw).with_context(|| format!("invalid URL {raw:?}"))
}

fn parse_urls(raw: &[String]) -> Result<Vec<BookmarkUrl>> {
    raw.iter().map(|r| url(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfmark_core::MemoryStore;

    fn run(text: &str) -> RunReport {
        let manager = TransactionManager::new(MemoryStore::default());
        let steps = parse(text).expect("parse");
        Runner::new(&manager).run(&steps).expect("run")
    }

    #[test]
    fn bindings_flow_between_steps() {
        let report = run(r#"[
            {"step": "transact", "txn": {"op": "new_folder", "parent": "menu", "title": "F", "as": "f"}},
            {"step": "transact", "txn": {"op": "new_separator", "parent": "$f"}},
            {"step": "snapshot", "guid": "$f"}
        ]"#);
        assert_eq!(report.failures(), 0);
        let folder = report.steps[2].tree.as_ref().expect("snapshot");
        assert_eq!(folder.title.as_deref(), Some("F"));
        assert_eq!(folder.children.len(), 1);
        assert_eq!(report.history.length, 2);
    }

    #[test]
    fn batch_is_one_entry() {
        let report = run(r#"[
            {"step": "batch", "txns": [
                {"op": "new_folder", "parent": "toolbar", "as": "a"},
                {"op": "new_folder", "parent": "toolbar", "as": "b"}
            ]},
            {"step": "undo"},
            {"step": "undo"}
        ]"#);
        assert_eq!(report.steps[0].created.len(), 2);
        assert_eq!(report.steps[0].kinds, vec!["NewFolder", "NewFolder"]);
        assert_eq!(report.steps[1].status, StepStatus::Applied);
        assert_eq!(report.steps[2].status, StepStatus::NotApplicable);
        assert_eq!(report.history.length, 1);
        assert_eq!(report.history.undo_position, 1);
    }

    #[test]
    fn batch_can_refer_to_items_it_created() {
        let report = run(r#"[
            {"step": "batch", "txns": [
                {"op": "new_folder", "parent": "menu", "title": "F", "as": "f"},
                {"op": "new_bookmark", "parent": "$f", "url": "http://in.folder/", "as": "b"}
            ]},
            {"step": "snapshot", "guid": "$f"}
        ]"#);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.history.entries, vec![vec!["NewBookmark", "NewFolder"]]);
        let folder = report.steps[1].tree.as_ref().expect("snapshot");
        assert_eq!(folder.children.len(), 1);
        assert_eq!(Some(&folder.children[0].guid), report.steps[0].created.get(1));
    }

    #[test]
    fn failed_batch_drops_its_bindings() {
        let manager = TransactionManager::new(MemoryStore::default());
        let steps = parse(
            r#"[
            {"step": "batch", "txns": [
                {"op": "new_folder", "parent": "menu", "as": "gone"},
                {"op": "remove", "guid": "menu"}
            ]},
            {"step": "transact", "txn": {"op": "new_separator", "parent": "$gone"}}
        ]"#,
        )
        .expect("parse");
        let err = Runner::new(&manager).run(&steps).expect_err("must fail");
        assert!(format!("{err:#}").contains("unknown binding $gone"));
        assert_eq!(manager.length(), 0);
    }

    #[test]
    fn unknown_binding_inside_batch_rolls_back_and_aborts() {
        let manager = TransactionManager::new(MemoryStore::default());
        let steps = parse(
            r#"[{"step": "batch", "txns": [
                {"op": "new_folder", "parent": "menu"},
                {"op": "new_separator", "parent": "$nope"}
            ]}]"#,
        )
        .expect("parse");
        let err = Runner::new(&manager).run(&steps).expect_err("must fail");
        assert!(format!("{err:#}").contains("unknown binding $nope"));
        assert_eq!(manager.length(), 0);
        let menu = manager
            .inspect(|s| s.children_order(&Guid::menu()))
            .expect("inspect")
            .expect("menu");
        assert!(menu.is_empty());
    }

    #[test]
    fn engine_errors_are_recorded_not_fatal() {
        let report = run(r#"[
            {"step": "transact", "txn": {"op": "remove", "guid": "menu"}},
            {"step": "transact", "txn": {"op": "new_separator", "parent": "unfiled"}}
        ]"#);
        assert_eq!(report.failures(), 1);
        let error = report.steps[0].error.as_ref().expect("error");
        assert_eq!(error.code, "E2005");
        assert_eq!(report.steps[1].status, StepStatus::Applied);
    }

    #[test]
    fn unknown_binding_aborts() {
        let manager = TransactionManager::new(MemoryStore::default());
        let steps = parse(r#"[{"step": "transact", "txn": {"op": "remove", "guid": "$nope"}}]"#)
            .expect("parse");
        let err = Runner::new(&manager).run(&steps).expect_err("must fail");
        assert!(format!("{err:#}").contains("unknown binding $nope"));
    }

    #[test]
    fn clear_without_flags_clears_both_sides() {
        let report = run(r#"[
            {"step": "transact", "txn": {"op": "new_separator", "parent": "menu"}},
            {"step": "transact", "txn": {"op": "new_separator", "parent": "menu"}},
            {"step": "undo"},
            {"step": "clear"}
        ]"#);
        assert_eq!(report.history.length, 0);
        assert_eq!(report.history.undo_position, 0);
    }

    #[test]
    fn annotate_null_removes() {
        let report = run(r#"[
            {"step": "transact", "txn": {"op": "new_folder", "parent": "menu", "as": "f",
                "annotations": {"a": 1, "b": "x"}}},
            {"step": "transact", "txn": {"op": "annotate", "guid": "$f", "annotations": {"a": null}}},
            {"step": "snapshot", "guid": "$f"}
        ]"#);
        let folder = report.steps[2].tree.as_ref().expect("snapshot");
        let names: Vec<&str> = folder.annos.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }
}
