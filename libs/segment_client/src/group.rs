//! Merging of lookups that share an identifier
//!
//! Every flushed batch is partitioned by identifier. Each partition becomes one
//! outbound request carrying the union of the partition's segment ids, so N
//! callers asking about the same identifier cost a single round trip.

use crate::error::AdmissionError;
use crate::identifier::IdentifierType;
use crate::task::LookupTask;
use crate::transport::TransportRequest;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const TOUCH_MULTI_PATH: &str = "/segment/touch-multi";

/// All lookups for one identifier within one flush
#[derive(Debug)]
pub struct RequestGroup {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    segment_ids: Vec<u32>,
    seen: HashSet<u32>,
    tasks: Vec<LookupTask>,
}

impl RequestGroup {
    fn new(first: LookupTask) -> Self {
        let mut group = Self {
            identifier: first.identifier.clone(),
            identifier_type: first.identifier_type,
            segment_ids: Vec::new(),
            seen: HashSet::new(),
            tasks: Vec::new(),
        };
        group.push(first);
        group
    }

    fn push(&mut self, task: LookupTask) {
        if self.seen.insert(task.segment_id) {
            self.segment_ids.push(task.segment_id);
        }
        self.tasks.push(task);
    }

    /// Unioned segment ids, first-seen order, no duplicates
    pub fn segment_ids(&self) -> &[u32] {
        &self.segment_ids
    }

    /// Member lookups in admission order
    pub fn tasks(&self) -> &[LookupTask] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<LookupTask> {
        self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The single outbound lookup covering every member
    pub fn to_request(&self, deadline: Duration) -> TransportRequest {
        let request = self
            .segment_ids
            .iter()
            .fold(TransportRequest::get(TOUCH_MULTI_PATH), |req, id| {
                req.with_query("segment_id", id.to_string())
            });

        request
            .with_query(self.identifier_type.query_key(), self.identifier.as_str())
            .with_deadline(deadline)
    }
}

/// Result of partitioning one flushed batch
#[derive(Debug, Default)]
pub struct Grouping {
    pub groups: Vec<RequestGroup>,
    /// Lookups that cannot join their identifier's group
    pub rejected: Vec<(LookupTask, AdmissionError)>,
}

/// Partition `tasks` by identifier, preserving first-seen identifier order
///
/// The group's identifier type is taken from its first task; later tasks for the
/// same identifier with a different type are rejected rather than sent under the
/// wrong query key.
pub fn group_tasks(tasks: Vec<LookupTask>) -> Grouping {
    let mut grouping = Grouping::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for task in tasks {
        match index.get(&task.identifier) {
            Some(&i) => {
                let group = &mut grouping.groups[i];
                if group.identifier_type == task.identifier_type {
                    group.push(task);
                } else {
                    let err = AdmissionError::MixedIdentifierType {
                        identifier: task.identifier.clone(),
                        expected: group.identifier_type,
                        actual: task.identifier_type,
                    };
                    grouping.rejected.push((task, err));
                }
            }
            None => {
                index.insert(task.identifier.clone(), grouping.groups.len());
                grouping.groups.push(RequestGroup::new(task));
            }
        }
    }

    grouping
}
