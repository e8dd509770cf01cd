//! Consistency checks for pack files and anything else implementing [`RatingDao`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::dao::RatingDao;
use crate::pack::PackReader;
use crate::telemetry::{noop_event_listener, PackEvent, PackEventListener};

/// Violations kept per file; the rest are only counted.
pub const MAX_REPORTED_VIOLATIONS: usize = 1000;

/// Which grouping a violation was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    User,
    Item,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::User => Side::Item,
            Side::Item => Side::User,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::User => f.write_str("user"),
            Side::Item => f.write_str("item"),
        }
    }
}

/// One inconsistency found by the validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The file could not be opened or parsed at all.
    OpenFailed { details: String },
    ChecksumMismatch { details: String },
    /// `stream_all` yielded a different number of ratings than declared.
    RatingCount { declared: usize, streamed: usize },
    /// The group sizes on one side do not add up to the rating count.
    GroupTotal { side: Side, expected: usize, actual: usize },
    /// A rating sits in a group whose key it does not carry.
    ForeignRating { side: Side, group: i64, found: i64 },
    /// A rating refers to an id missing from the other side's id set.
    UnknownId { side: Side, id: i64, group: i64 },
    /// A group key is missing from its own side's id set.
    UnknownGroupKey { side: Side, id: i64 },
    /// The id set and the number of groups disagree.
    GroupCount { side: Side, ids: usize, groups: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OpenFailed { details } => write!(f, "cannot open pack: {}", details),
            Violation::ChecksumMismatch { details } => write!(f, "{}", details),
            Violation::RatingCount { declared, streamed } => {
                write!(f, "header declares {} ratings, stream yielded {}", declared, streamed)
            }
            Violation::GroupTotal { side, expected, actual } => {
                write!(f, "{} groups hold {} ratings, expected {}", side, actual, expected)
            }
            Violation::ForeignRating { side, group, found } => {
                write!(f, "{} group {} contains a rating for {} {}", side, group, side, found)
            }
            Violation::UnknownId { side, id, group } => write!(
                f,
                "{} group {} contains unknown {} {}",
                side.other(),
                group,
                side,
                id
            ),
            Violation::UnknownGroupKey { side, id } => {
                write!(f, "{} group key {} is not a known {} id", side, id, side)
            }
            Violation::GroupCount { side, ids, groups } => {
                write!(f, "{} {} ids but {} {} groups", ids, side, groups, side)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Collector {
    kept: Vec<Violation>,
    total: usize,
}

impl Collector {
    fn push(&mut self, v: Violation) {
        self.total += 1;
        if self.kept.len() < MAX_REPORTED_VIOLATIONS {
            self.kept.push(v);
        }
    }
}

/// Result of validating one file (or one in-memory view).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub path: Option<PathBuf>,
    /// The first [`MAX_REPORTED_VIOLATIONS`] violations found.
    pub violations: Vec<Violation>,
    /// Number of violations found, including unreported ones.
    pub violation_count: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violation_count == 0
    }
}

/// Checks a rating view against its declared rating count.
pub fn validate_dao<D: RatingDao>(dao: &D, declared: usize) -> ValidationReport {
    let mut out = Collector::default();
    check_dao(dao, declared, &mut out);
    ValidationReport {
        path: None,
        violations: out.kept,
        violation_count: out.total,
    }
}

fn check_dao<D: RatingDao>(dao: &D, declared: usize, out: &mut Collector) {
    let streamed = dao.stream_all().count();
    if streamed != declared {
        out.push(Violation::RatingCount { declared, streamed });
    }

    let mut user_groups = 0usize;
    let mut user_total = 0usize;
    for g in dao.stream_by_user() {
        user_groups += 1;
        if !dao.user_ids().contains(g.id) {
            out.push(Violation::UnknownGroupKey { side: Side::User, id: g.id });
        }
        for r in g.ratings.iter() {
            user_total += 1;
            if r.user != g.id {
                out.push(Violation::ForeignRating {
                    side: Side::User,
                    group: g.id,
                    found: r.user,
                });
            }
            if !dao.item_ids().contains(r.item) {
                out.push(Violation::UnknownId {
                    side: Side::Item,
                    id: r.item,
                    group: g.id,
                });
            }
        }
    }
    if user_total != declared {
        out.push(Violation::GroupTotal {
            side: Side::User,
            expected: declared,
            actual: user_total,
        });
    }

    let mut item_groups = 0usize;
    let mut item_total = 0usize;
    for g in dao.stream_by_item() {
        item_groups += 1;
        if !dao.item_ids().contains(g.id) {
            out.push(Violation::UnknownGroupKey { side: Side::Item, id: g.id });
        }
        for r in g.ratings.iter() {
            item_total += 1;
            if r.item != g.id {
                out.push(Violation::ForeignRating {
                    side: Side::Item,
                    group: g.id,
                    found: r.item,
                });
            }
            if !dao.user_ids().contains(r.user) {
                out.push(Violation::UnknownId {
                    side: Side::User,
                    id: r.user,
                    group: g.id,
                });
            }
        }
    }
    if item_total != declared {
        out.push(Violation::GroupTotal {
            side: Side::Item,
            expected: declared,
            actual: item_total,
        });
    }

    let user_group_count = user_groups.max(dao.user_groups().group_count());
    if dao.user_ids().len() != user_group_count {
        out.push(Violation::GroupCount {
            side: Side::User,
            ids: dao.user_ids().len(),
            groups: user_group_count,
        });
    }
    let item_group_count = item_groups.max(dao.item_groups().group_count());
    if dao.item_ids().len() != item_group_count {
        out.push(Violation::GroupCount {
            side: Side::Item,
            ids: dao.item_ids().len(),
            groups: item_group_count,
        });
    }
}

/// Opens and validates one pack file. Failure to open is reported as a violation.
pub fn validate_pack<P: AsRef<Path>>(path: P) -> ValidationReport {
    validate_pack_with_listener(path, &noop_event_listener())
}

pub fn validate_pack_with_listener<P: AsRef<Path>>(
    path: P,
    listener: &Arc<dyn PackEventListener>,
) -> ValidationReport {
    let path = path.as_ref();
    let mut out = Collector::default();
    match PackReader::open_with_listener(path, listener.clone()) {
        Ok(reader) => {
            if let Err(e) = reader.verify_checksum() {
                out.push(Violation::ChecksumMismatch { details: e.to_string() });
            }
            check_dao(&reader, reader.header().rating_count as usize, &mut out);
        }
        Err(e) => out.push(Violation::OpenFailed { details: e.to_string() }),
    }
    listener.on_event(PackEvent::ValidationFinished {
        path: path.to_path_buf(),
        violations: out.total,
    });
    ValidationReport {
        path: Some(path.to_path_buf()),
        violations: out.kept,
        violation_count: out.total,
    }
}

/// Reports for a batch of files, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSummary {
    pub reports: Vec<ValidationReport>,
}

impl ValidationSummary {
    pub fn is_valid(&self) -> bool {
        self.reports.iter().all(ValidationReport::is_valid)
    }

    /// Every file with at least one violation.
    pub fn failed_files(&self) -> Vec<&Path> {
        self.reports
            .iter()
            .filter(|r| !r.is_valid())
            .filter_map(|r| r.path.as_deref())
            .collect()
    }
}

/// Validates every file in parallel.
pub fn validate_files<P: AsRef<Path> + Sync>(
    paths: &[P],
    listener: &Arc<dyn PackEventListener>,
) -> ValidationSummary {
    let reports = paths
        .par_iter()
        .map(|p| validate_pack_with_listener(p, listener))
        .collect();
    ValidationSummary { reports }
}
