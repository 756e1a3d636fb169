use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error as ThisError;

/// 错误根因的共享表示。
///
/// 使用 `Arc` 而非 `Box`，使 [`FlowError`] 可以克隆后分别交给下游与诊断记录。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 统一的结果别名，默认错误类型为 [`FlowError`]。
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

/// `FlowError` 是推式流中唯一的终止错误形态。
///
/// # 设计背景（Why）
/// - 上游错误、协议违例、需求不足与定时器拒绝最终都要以一次 `on_error` 交给下游，
///   下游需要一个稳定的错误码来区分它们，而不是解析消息字符串；
/// - 结构为稳定 `code` + 人类可读 `message` + 可选 `cause`，日志与告警只依赖 `code`。
///
/// # 契约说明（What）
/// - `code` 始终为 [`codes`] 中备案的 `'static` 字符串，或上游自定义的 `<域>.<语义>` 码值；
/// - `Display` 输出 `[code] message`，`source()` 暴露底层原因；
/// - 错误可克隆、可跨线程移动（`Send + Sync + 'static`）。
#[derive(Clone)]
pub struct FlowError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: ErrorCategory,
}

impl FlowError {
    /// 构造错误，分类默认为 [`ErrorCategory::Upstream`]。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: ErrorCategory::Upstream,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 覆盖错误分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// 上游在已请求额度之外继续推送元素。
    pub fn unrequested_element() -> Self {
        Self::new(codes::UNREQUESTED_ELEMENT, "Unrequested element received")
            .with_category(ErrorCategory::ProtocolViolation)
    }

    /// 批次已就绪，但下游没有剩余需求。
    pub fn insufficient_demand() -> Self {
        Self::new(
            codes::INSUFFICIENT_DEMAND,
            "Could not emit buffer due to lack of requests",
        )
        .with_category(ErrorCategory::InsufficientDemand)
    }

    /// 定时器服务拒绝调度，原样携带拒绝原因。
    pub fn timer_rejected(rejection: TimerRejected) -> Self {
        Self::new(codes::TIMER_REJECTED, rejection.to_string())
            .with_category(ErrorCategory::Rejected)
            .with_cause(rejection)
    }

    /// 同一阶段收到第二次订阅。
    pub fn duplicate_subscription() -> Self {
        Self::new(
            codes::DUPLICATE_SUBSCRIPTION,
            "Subscription already set: on_subscribe called twice",
        )
        .with_category(ErrorCategory::ProtocolViolation)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 获取错误分类。
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 是否为定时器拒绝导致的终止。
    pub fn is_timer_rejection(&self) -> bool {
        self.code == codes::TIMER_REJECTED
    }
}

impl fmt::Debug for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("category", &self.category)
            .field("cause", &self.cause.as_ref().map(|cause| cause.to_string()))
            .finish()
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for FlowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误分类，帮助下游决定日志级别与告警策略。
///
/// 本层不做任何重试：所有分类均代表终止信号，区别只在于责任方。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// 上游透传的业务错误。
    Upstream,
    /// 对端违反推式流协议（超额推送、重复订阅）。
    ProtocolViolation,
    /// 下游需求不足以接收已就绪的批次。
    InsufficientDemand,
    /// 定时器或执行器拒绝调度。
    Rejected,
}

/// 稳定错误码集合。
///
/// 错误码遵循 `<领域>.<语义>` 命名约定，便于在跨组件日志中检索与聚合。
pub mod codes {
    /// 上游在未获许可的情况下推送元素。
    pub const UNREQUESTED_ELEMENT: &str = "flow.unrequested_element";
    /// 批次就绪但下游需求耗尽。
    pub const INSUFFICIENT_DEMAND: &str = "flow.insufficient_demand";
    /// 定时器服务拒绝调度。
    pub const TIMER_REJECTED: &str = "flow.timer_rejected";
    /// 重复调用 `on_subscribe`。
    pub const DUPLICATE_SUBSCRIPTION: &str = "flow.duplicate_subscription";
    /// 上游业务错误的通用码值。
    pub const UPSTREAM: &str = "flow.upstream";
}

/// 定时器服务拒绝调度时返回的错误。
///
/// - **意图 (Why)**：执行器关闭后仍尝试调度属于终止性故障，需要被算子转换为 `on_error`；
/// - **契约 (What)**：`worker` 为拒绝调度的工作线程名称，`reason` 描述拒绝原因。
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("timer worker `{worker}` rejected task: {reason}")]
pub struct TimerRejected {
    pub worker: Cow<'static, str>,
    pub reason: Cow<'static, str>,
}

impl TimerRejected {
    /// 构造“执行器已关闭”拒绝。
    pub fn shutdown(worker: impl Into<Cow<'static, str>>) -> Self {
        Self {
            worker: worker.into(),
            reason: Cow::Borrowed("executor has been shut down"),
        }
    }

    /// 构造“延迟超出时钟可表示范围”拒绝。
    pub fn delay_out_of_range(worker: impl Into<Cow<'static, str>>) -> Self {
        Self {
            worker: worker.into(),
            reason: Cow::Borrowed("delay exceeds the representable clock range"),
        }
    }
}
