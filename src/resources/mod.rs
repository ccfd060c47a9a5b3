//! 资源层：URI 寻址的只读数据源、订阅者列表、注册表、宿主快照适配

pub mod host_snapshot;
pub mod registry;
pub mod subscribers;

pub use host_snapshot::HostSnapshotResource;
pub use registry::{ReadParams, Resource, ResourceCandidate, ResourceRegistry};
pub use subscribers::{NotifyReport, Subscriber, SubscriberCallback, Subscribers};
