pub mod admission;
pub mod api;
pub mod billing;
pub mod models;
pub mod policy;
pub mod sink;
pub mod status;
pub mod store;
pub mod worker;

use std::sync::Arc;

pub use admission::{AdmitError, PublishAdmission};
pub use api::{publish_submission, queue_status, routes, run_queue_worker};
pub use billing::{BillingError, BillingGateway, ChargeOutcome, StripeBillingGateway};
pub use models::{
    AdmitOutcome, BatchReport, BillingStatus, NotificationRetryReport, QueuedSubmissionInfo,
    ReconcileReport, Submission, SubmissionStatus, TeamAccount, TeamQueueStatus, TeamTier,
};
pub use policy::PublishPolicy;
pub use sink::{PublicationSink, SinkError, SlackPublicationSink};
pub use status::team_queue_status;
pub use store::{InMemorySubmissionStore, PgSubmissionStore, StoreError, SubmissionStore};
pub use worker::{spawn as spawn_publish_queue_scheduler, ReconciliationWorker};

/// key: publish-context -> collaborators shared by request handlers and the scheduled job
#[derive(Clone)]
pub struct PublishingContext {
    pub store: Arc<dyn SubmissionStore>,
    pub billing: Arc<dyn BillingGateway>,
    pub policy: PublishPolicy,
    pub admission: PublishAdmission,
    pub worker: ReconciliationWorker,
    /// Secret expected in `X-Worker-Secret`; `None` refuses every trigger.
    pub worker_secret: Option<String>,
}

impl PublishingContext {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        billing: Arc<dyn BillingGateway>,
        sink: Arc<dyn PublicationSink>,
        policy: PublishPolicy,
        worker_secret: Option<String>,
    ) -> Self {
        let admission = PublishAdmission::new(
            store.clone(),
            billing.clone(),
            sink.clone(),
            policy.clone(),
        );
        let worker = ReconciliationWorker::new(store.clone(), billing.clone(), sink, policy.clone());
        Self {
            store,
            billing,
            policy,
            admission,
            worker,
            worker_secret,
        }
    }
}
