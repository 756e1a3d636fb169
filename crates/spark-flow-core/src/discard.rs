//! 丢弃钩子：接收所有已缓冲却永远不会交付下游的元素。
//!
//! # 设计背景（Why）
//! - 元素可能持有池化资源（例如租借的缓冲区），被静默丢弃会造成泄漏；
//! - 取消、错误、需求不足与定时器拒绝四条终止路径都会遗留缓冲元素，需要统一出口。
//!
//! # 契约说明（What）
//! - 每个未交付元素恰好交给钩子一次；成功交付的元素永远不会进入钩子；
//! - 钩子可能在生产线程或定时器线程上被调用，实现需满足 `Send + Sync`。

use std::fmt;
use std::marker::PhantomData;

/// 丢弃钩子契约。
pub trait DiscardHook<T>: Send + Sync {
    /// 处理一个未交付的元素。
    fn discard(&self, item: T);

    /// 批量处理，默认逐个委托给 [`discard`](Self::discard)。
    fn discard_all(&self, items: Vec<T>) {
        for item in items {
            self.discard(item);
        }
    }
}

/// 不做任何处理的钩子，元素随 `Drop` 释放。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiscard;

impl<T> DiscardHook<T> for NoopDiscard {
    fn discard(&self, _item: T) {}
}

/// 将闭包适配为丢弃钩子。
pub struct FnDiscard<T, F> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> FnDiscard<T, F>
where
    F: Fn(T) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F> DiscardHook<T> for FnDiscard<T, F>
where
    F: Fn(T) + Send + Sync,
{
    fn discard(&self, item: T) {
        (self.f)(item);
    }
}

impl<T, F> fmt::Debug for FnDiscard<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDiscard").finish_non_exhaustive()
    }
}
