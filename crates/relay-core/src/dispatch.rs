use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use relay_types::{ChatId, Destination, MessageRef};

use crate::transport::ChatTransport;

/// Copies in flight at once when the caller does not say otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

const UNREGISTERED_REASON: &str = "destination is no longer registered";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub destination: ChatId,
    pub display_name: String,
    pub reason: String,
}

/// Aggregated outcome of one repost. Failures keep dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub success_count: usize,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn attempted(&self) -> usize {
        self.success_count + self.failures.len()
    }

    /// Human-readable summary for the session owner.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "📤 Repost finished: {} delivered, {} failed.",
            self.success_count,
            self.failures.len()
        );
        if !self.failures.is_empty() {
            out.push_str("\n\nFailed:");
            for failure in &self.failures {
                let _ = write!(
                    out,
                    "\n• {} ({}): {}",
                    failure.display_name, failure.destination, failure.reason
                );
            }
        }
        out
    }
}

/// Targets for one repost, resolved against the registry at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    /// Selected and still registered, in registry order.
    pub targets: Vec<Destination>,
    /// Selected but removed from the registry since.
    pub unregistered: Vec<ChatId>,
}

impl DispatchPlan {
    pub fn new(registered: &[Destination], selected: &BTreeSet<ChatId>) -> Self {
        let targets: Vec<Destination> = registered
            .iter()
            .filter(|d| selected.contains(&d.id))
            .cloned()
            .collect();
        let unregistered = selected
            .iter()
            .filter(|id| !targets.iter().any(|d| d.id == **id))
            .copied()
            .collect();
        Self {
            targets,
            unregistered,
        }
    }

    /// Dispatch to every target, then record unregistered ids as failures.
    pub async fn run(
        self,
        transport: Arc<dyn ChatTransport>,
        source: MessageRef,
        concurrency: usize,
    ) -> DispatchReport {
        let mut report = dispatch(transport, source, self.targets, concurrency).await;
        for id in self.unregistered {
            warn!("Skipping {}: {}", id, UNREGISTERED_REASON);
            report.failures.push(DispatchFailure {
                destination: id,
                display_name: id.to_string(),
                reason: UNREGISTERED_REASON.to_string(),
            });
        }
        report
    }
}

/// Copy `source` into every destination. A failed copy is recorded and never
/// stops the others; every outcome is collected before returning.
pub async fn dispatch(
    transport: Arc<dyn ChatTransport>,
    source: MessageRef,
    destinations: Vec<Destination>,
    concurrency: usize,
) -> DispatchReport {
    // Each copy owns what it needs, so the whole dispatch stays `Send`
    let copies: Vec<_> = destinations
        .into_iter()
        .map(|destination| {
            let transport = transport.clone();
            async move {
                let outcome = transport.copy_message(destination.id, source).await;
                (destination, outcome)
            }
        })
        .collect();

    // `buffered` yields in input order regardless of completion order
    let outcomes: Vec<(Destination, anyhow::Result<()>)> = stream::iter(copies)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = DispatchReport::default();
    for (destination, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                info!("Message {} reposted to {}", source.message_id, destination.id);
                report.success_count += 1;
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!("Repost to {} failed: {}", destination.id, reason);
                report.failures.push(DispatchFailure {
                    destination: destination.id,
                    display_name: destination.display_name,
                    reason,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use relay_types::MessageId;

    use super::*;
    use crate::testing::RecordingTransport;

    fn source() -> MessageRef {
        MessageRef::new(ChatId(555), MessageId(1))
    }

    fn three() -> Vec<Destination> {
        vec![
            Destination::new(ChatId(1), "One"),
            Destination::new(ChatId(2), "Two"),
            Destination::new(ChatId(3), "Three"),
        ]
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_destinations() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_copies_to(ChatId(1), "chat not found");
        transport.fail_copies_to(ChatId(3), "bot was kicked");

        let report = dispatch(transport.clone(), source(), three(), 1).await;

        assert_eq!(report.success_count, 1);
        assert_eq!(
            report.failures,
            vec![
                DispatchFailure {
                    destination: ChatId(1),
                    display_name: "One".into(),
                    reason: "chat not found".into(),
                },
                DispatchFailure {
                    destination: ChatId(3),
                    display_name: "Three".into(),
                    reason: "bot was kicked".into(),
                },
            ]
        );
        // All three were attempted
        assert_eq!(transport.copy_targets(), vec![ChatId(1), ChatId(2), ChatId(3)]);
    }

    #[tokio::test]
    async fn concurrent_dispatch_keeps_order() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_copies_to(ChatId(2), "flood wait");

        let report = dispatch(transport.clone(), source(), three(), 8).await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].destination, ChatId(2));
        assert_eq!(transport.copy_targets().len(), 3);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn dispatch_future_is_send() {
        let transport: Arc<dyn ChatTransport> = Arc::new(RecordingTransport::new());
        let plan = DispatchPlan::new(&three(), &BTreeSet::from([ChatId(1)]));
        assert_send(&plan.run(transport, source(), 2));
    }

    #[test]
    fn plan_follows_registry_order() {
        let selected = BTreeSet::from([ChatId(3), ChatId(1), ChatId(42)]);
        let plan = DispatchPlan::new(&three(), &selected);

        let ids: Vec<ChatId> = plan.targets.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![ChatId(1), ChatId(3)]);
        assert_eq!(plan.unregistered, vec![ChatId(42)]);
    }

    #[tokio::test]
    async fn unregistered_ids_are_reported_not_attempted() {
        let transport = Arc::new(RecordingTransport::new());
        let selected = BTreeSet::from([ChatId(2), ChatId(42)]);
        let plan = DispatchPlan::new(&three(), &selected);

        let report = plan.run(transport.clone(), source(), DEFAULT_CONCURRENCY).await;

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].destination, ChatId(42));
        assert_eq!(transport.copy_targets(), vec![ChatId(2)]);
    }

    #[test]
    fn summary_lists_each_failure() {
        let report = DispatchReport {
            success_count: 2,
            failures: vec![DispatchFailure {
                destination: ChatId(-200),
                display_name: "Beta".into(),
                reason: "Forbidden".into(),
            }],
        };
        assert_eq!(
            report.summary(),
            "📤 Repost finished: 2 delivered, 1 failed.\n\nFailed:\n• Beta (-200): Forbidden"
        );
        assert_eq!(report.attempted(), 3);
    }

    #[test]
    fn clean_summary_has_no_failure_section() {
        let report = DispatchReport {
            success_count: 1,
            failures: vec![],
        };
        assert_eq!(report.summary(), "📤 Repost finished: 1 delivered, 0 failed.");
    }
}
