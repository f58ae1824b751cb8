// Domain models shared by the repos, the sampler and the push channel

mod certificate;
mod event;
mod job;
mod metrics;
mod notification;
mod site;
mod stats;

pub use certificate::{CertificateRecord, CertificateStatus};
pub use event::{InitialState, PanelEvent, SystemUpdate, TickStats};
pub use job::ScheduledJob;
pub use metrics::{CpuSample, DiskUsage, MemorySample, ServiceStatus, ServiceStatusMap};
pub use notification::{Notification, NotificationKind};
pub use site::{CreatedSite, NewSite, Site};
pub use stats::{
    CertificateCounts, DatabaseStats, MetricHistory, PanelStats, SiteCounts, SystemSummary,
};
