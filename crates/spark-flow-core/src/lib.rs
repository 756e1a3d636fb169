#![deny(unsafe_code)]
#![doc = "spark-flow-core: 背压友好的推式流契约。"]
#![doc = ""]
#![doc = "本 Crate 只定义算子之间协作所需的最小契约：订阅/请求/取消协议、定时器服务、丢弃钩子与稳定错误码。"]
#![doc = "具体算子（例如按大小或时间分批的缓冲算子）位于独立 crate，中间只通过这些 trait 交互。"]

pub mod discard;
pub mod error;
pub mod flow;
/// 测试桩命名空间，集中暴露官方维护的记录型订阅者、手动订阅与丢弃记录器。
///
/// # 设计背景（Why）
/// - 算子测试需要同时观察下游收到的批次、上游收到的请求量与丢弃钩子的调用；
/// - 统一维护可避免各测试文件重复定义同一套记录结构。
pub mod test_stubs;
pub mod time;

pub use discard::{DiscardHook, FnDiscard, NoopDiscard};
pub use error::{ErrorCategory, FlowError, Result, TimerRejected, codes};
pub use flow::{Subscriber, Subscription, UNBOUNDED};
pub use time::{CancelFlag, ThreadTimer, TimerHandle, TimerService, TimerTask, VirtualTimer};
