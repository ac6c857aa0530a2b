//! # Command Surface
//!
//! Reply-string composition for every operator and keyword command. The
//! host (HTTP route or chat frontend) does pattern matching and permission
//! checks; this layer runs the engine and renders what the operator sees.
//! Reply strings are part of the user-facing contract and stay unchanged
//! across hosts.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use tracing::warn;

use crate::almanac::DayCache;
use crate::compose::{render_message, DeliveryTag};
use crate::dispatch::{FanOutDispatcher, PushMode};
use crate::error::DispatchError;
use crate::fetcher::ContentFetcher;
use crate::ports::{Destination, Transport};
use crate::probe::{summarize, ProbeAggregator, ProbeReport};
use crate::providers::ProviderRegistry;
use crate::usage::{format_tokens, UsageClient};

/// Reply when a quote cannot be fetched at all.
pub const APOLOGY_REPLY: &str = "暂时没有合适的语录，晚点再试试吧~";
const INVALID_INDEX_REPLY: &str = "无效的API编号，请使用#语录API列表查看可用API";
const BUSY_REPLY: &str = "已有推送任务正在进行，请稍后再试";

pub struct Commands {
    registry: Arc<ProviderRegistry>,
    fetcher: Arc<ContentFetcher>,
    cache: Arc<DayCache>,
    dispatcher: Arc<FanOutDispatcher>,
    transport: Arc<dyn Transport>,
    prober: Arc<ProbeAggregator>,
    usage: Option<Arc<UsageClient>>,
    probe_notes: Option<String>,
}

impl Commands {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        fetcher: Arc<ContentFetcher>,
        cache: Arc<DayCache>,
        dispatcher: Arc<FanOutDispatcher>,
        transport: Arc<dyn Transport>,
        prober: Arc<ProbeAggregator>,
        usage: Option<Arc<UsageClient>>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            cache,
            dispatcher,
            transport,
            prober,
            usage,
            probe_notes: None,
        }
    }

    /// Footer appended to status reports (service notes, invite links).
    pub fn with_probe_notes(mut self, notes: Option<String>) -> Self {
        self.probe_notes = notes;
        self
    }

    /// Keyword-triggered single quote, answered in place.
    pub async fn quote(&self) -> String {
        match self.compose_quote(DeliveryTag::Interactive).await {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "quote request failed");
                APOLOGY_REPLY.to_string()
            }
        }
    }

    async fn compose_quote(&self, tag: DeliveryTag) -> Result<String> {
        let provider = self.registry.select()?;
        let item = self.fetcher.fetch(provider).await?;
        let annotation = self.cache.get().await;
        Ok(render_message(&annotation, &item, tag))
    }

    /// Operator-triggered full fan-out, timed end to end.
    pub async fn push_all(&self) -> String {
        let started = Instant::now();
        let annotation = self.cache.get().await;
        match self
            .dispatcher
            .run(PushMode::Manual, Some(annotation))
            .await
        {
            Ok(summary) => format!(
                "全群推送完成！\n成功: {}个\n失败: {}个\n耗时: {:.1}秒",
                summary.success_count,
                summary.fail_count,
                started.elapsed().as_secs_f64()
            ),
            Err(DispatchError::Busy) => BUSY_REPLY.to_string(),
            Err(e) => format!("全群推送失败: {e}"),
        }
    }

    /// Operator-triggered single-destination test push.
    pub async fn test_push(&self, dest: &Destination) -> String {
        let message = match self.compose_quote(DeliveryTag::Test).await {
            Ok(message) => message,
            Err(e) => return format!("测试推送失败: {e}"),
        };
        match self.transport.send(dest, &message).await {
            Ok(()) => format!("已向群 {dest} 发送测试推送"),
            Err(e) => format!("测试推送失败: {e}"),
        }
    }

    /// Numbered provider list with weights and the advisory current marker.
    pub fn list_providers(&self) -> String {
        let mut lines = vec!["当前配置的API列表:".to_string()];
        for (i, p) in self.registry.list().iter().enumerate() {
            lines.push(format!("{}. {} (权重:{})", i + 1, p.id, p.weight));
            lines.push(format!("   URL: {}", p.endpoint));
            if i == self.registry.current() {
                lines.push("   ← 当前使用中".to_string());
            }
        }
        lines.push("\n使用 #语录切换API[编号] 切换当前API".to_string());
        lines.join("\n")
    }

    /// Move the advisory current marker. `index` is 1-based, as typed in
    /// the chat command.
    pub fn switch_provider(&self, index: usize) -> String {
        let Some(zero_based) = index.checked_sub(1) else {
            return INVALID_INDEX_REPLY.to_string();
        };
        match self.registry.set_current(zero_based) {
            Ok(()) => format!("已切换到API: {}", self.registry.list()[zero_based].id),
            Err(_) => INVALID_INDEX_REPLY.to_string(),
        }
    }

    /// Full status report as ordered message sections (one chat node each):
    /// header, per-site model blocks, endpoint connectivity, summary, notes.
    pub async fn model_status(&self) -> Vec<String> {
        let mut sections = vec![format!(
            "📡 模型状态检测 - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )];

        if self.prober.is_empty() {
            sections.push("未配置探测目标".to_string());
            return sections;
        }

        let reports = self.prober.run_all().await;
        let (models, endpoints): (Vec<ProbeReport>, Vec<ProbeReport>) =
            reports.into_iter().partition(|r| r.group.is_some());

        // Per-site blocks, sites in first-seen order.
        let mut sites: Vec<&str> = Vec::new();
        for r in &models {
            if let Some(site) = r.group.as_deref() {
                if !sites.contains(&site) {
                    sites.push(site);
                }
            }
        }
        for site in sites {
            sections.push(format!("🏠 站点: {site}"));
            for r in models.iter().filter(|r| r.group.as_deref() == Some(site)) {
                sections.push(render_model_report(r));
            }
        }

        sections.push("🛰️ 线路连通性:".to_string());
        for r in &endpoints {
            let icon = if r.ok { "✅" } else { "❌" };
            sections.push(format!(
                "{icon} {}  —  {} [{}ms]",
                r.target, r.status, r.latency_ms
            ));
        }

        sections.push(render_model_summary(&models));

        if let Some(notes) = &self.probe_notes {
            sections.push(notes.clone());
        }
        sections
    }

    /// Trailing-24h token usage report.
    pub async fn usage_report(&self) -> String {
        let Some(client) = &self.usage else {
            return "未配置token统计接口".to_string();
        };
        match client.fetch_last_24h().await {
            Ok(Some(u)) => {
                let per_hour = (u.points as f64 / 24.0).round() as u64;
                format!(
                    "⏱️ 统计时间: {}\n至 {}\n🪙 总Token用量: {} ({})\n📈 数据点数: {} (平均每小时约{}个数据点)",
                    u.window_start.format("%Y-%m-%d %H:%M:%S"),
                    u.window_end.format("%Y-%m-%d %H:%M:%S"),
                    format_tokens(u.total_tokens),
                    u.total_tokens,
                    u.points,
                    per_hour
                )
            }
            Ok(None) => "未获取到有效token用量数据".to_string(),
            Err(e) => {
                warn!(error = %e, "usage query failed");
                format!("统计token用量出错: {e}")
            }
        }
    }
}

fn render_model_report(r: &ProbeReport) -> String {
    let response = r.response.as_deref().unwrap_or("无响应");
    let mut block = format!(
        "🛠️ 模型: {}\n📊 状态: {}\n⏱️ 延迟: {}ms\n💬 响应: {}",
        r.target, r.status, r.latency_ms, response
    );
    if let Some(error) = &r.error {
        block.push_str(&format!("\n⚠️ 错误: {}", error.label()));
    }
    block
}

fn render_model_summary(models: &[ProbeReport]) -> String {
    let s = summarize(models);
    let total = models.len();
    format!(
        "📊 检测总结:\n✅ 正常模型: {}/{total}\n⚠️ 异常模型: {}/{total}\n❌ 失败模型: {}/{total}\n⏱️ 平均延迟: {}ms\n💡 提示: 失败模型可能需要检查API密钥或服务状态",
        s.ok, s.degraded, s.failed, s.mean_latency_ms
    )
}
