//! tracy 性能分析的轻量封装
//!
//! `tracy_client::span!` 要求 Client 已经启动，库代码和测试里不一定满足，
//! 这里在 Client 未运行时直接返回 `None`。

/// 在当前位置开启一个 tracy span，作用域结束时关闭
///
/// ```ignore
/// let _span = tessel_crate_tools::profile_span!("RgTaskProcessor::process");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::profile::span_alloc($name, file!(), line!())
    };
}

#[inline]
pub fn span_alloc(name: &str, file: &str, line: u32) -> Option<tracy_client::Span> {
    tracy_client::Client::running().map(|client| client.span_alloc(Some(name), "", file, line, 0))
}
