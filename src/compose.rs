//! Outbound message rendering: almanac header, divider, quote body and
//! provenance tag. The layout is fixed; only the tag varies by trigger.

use crate::almanac::DayAnnotation;
use crate::fetcher::ContentItem;

const DIVIDER: &str = "————————";

/// Which trigger produced a message; selects the provenance tag suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTag {
    /// Keyword request answered in place.
    Interactive,
    /// Cron-driven daily push.
    Scheduled,
    /// Operator-triggered full push.
    Manual,
    /// Operator-triggered single-destination test.
    Test,
}

impl DeliveryTag {
    fn render(self, provider_id: &str) -> String {
        match self {
            DeliveryTag::Interactive => format!("[来自:{provider_id}]"),
            DeliveryTag::Scheduled => format!("[每日推送 来自:{provider_id}]"),
            DeliveryTag::Manual => format!("[手动推送 来自:{provider_id}]"),
            DeliveryTag::Test => format!("[测试推送 来自:{provider_id}]"),
        }
    }
}

/// Render the full five-line outbound message.
pub fn render_message(annotation: &DayAnnotation, item: &ContentItem, tag: DeliveryTag) -> String {
    [
        format!(
            "🕑{} {} {}",
            annotation.date, annotation.time, annotation.weekday
        ),
        format!("🗓️{} {}", annotation.chinese_era, annotation.lunar_date),
        DIVIDER.to_string(),
        item.text.clone(),
        tag.render(&item.provider_id),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation() -> DayAnnotation {
        DayAnnotation {
            timestamp: 1_787_716_800_000,
            date: "2026年8月25日".into(),
            time: "08:00:00".into(),
            weekday: "星期二".into(),
            chinese_era: "丙午年【马年】".into(),
            lunar_date: "七月十四".into(),
            cache_time: 1_787_716_800_000,
        }
    }

    fn item() -> ContentItem {
        ContentItem {
            text: "去见你想见的人吧。".into(),
            provider_id: "4qb-emowenan".into(),
        }
    }

    #[test]
    fn scheduled_message_layout() {
        let msg = render_message(&annotation(), &item(), DeliveryTag::Scheduled);
        assert_eq!(
            msg,
            "🕑2026年8月25日 08:00:00 星期二\n\
             🗓️丙午年【马年】 七月十四\n\
             ————————\n\
             去见你想见的人吧。\n\
             [每日推送 来自:4qb-emowenan]"
        );
    }

    #[test]
    fn tag_varies_with_trigger() {
        let a = annotation();
        let i = item();
        let last = |tag| {
            render_message(&a, &i, tag)
                .lines()
                .last()
                .unwrap()
                .to_string()
        };
        assert_eq!(last(DeliveryTag::Interactive), "[来自:4qb-emowenan]");
        assert_eq!(last(DeliveryTag::Manual), "[手动推送 来自:4qb-emowenan]");
        assert_eq!(last(DeliveryTag::Test), "[测试推送 来自:4qb-emowenan]");
    }

    #[test]
    fn degraded_annotation_renders_marker_line() {
        let mut a = annotation();
        a.chinese_era = crate::almanac::DEGRADED_ERA.into();
        a.lunar_date = String::new();
        let msg = render_message(&a, &item(), DeliveryTag::Interactive);
        let line2 = msg.lines().nth(1).unwrap();
        assert_eq!(line2, "🗓️农历数据获取失败 ");
    }
}
