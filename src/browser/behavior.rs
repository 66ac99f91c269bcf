use rand::{thread_rng, Rng};
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::sleep;
use tracing::debug;

use crate::browser::{Browser, BrowserError, Locator};
use crate::cli::config::{BrowserBehavior, ScrollPolicy};

/// Human-like pacing for element interactions
pub struct BehaviorSimulator {
    config: BrowserBehavior,
}

impl BehaviorSimulator {
    pub fn new(config: BrowserBehavior) -> Self {
        Self { config }
    }

    fn jitter(range: (u64, u64)) -> Duration {
        let (min, max) = range;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(thread_rng().gen_range(min..max))
    }

    /// Click with a random reaction delay
    pub async fn click(&self, element: &WebElement) -> Result<(), BrowserError> {
        sleep(Self::jitter(self.config.click_delay)).await;

        element.scroll_into_view().await?;
        element.click().await?;

        debug!("Clicked element");
        Ok(())
    }

    /// Type text one character at a time with a variable delay
    pub async fn type_text(&self, element: &WebElement, text: &str) -> Result<(), BrowserError> {
        element.clear().await?;

        for c in text.chars() {
            let delay = Self::jitter(self.config.typing_speed);
            element.send_keys(c.to_string()).await?;
            sleep(delay).await;
        }

        debug!("Typed text: {}", text);
        Ok(())
    }
}

/// Scroll until the number of `items` stops growing for `policy.stable_rounds`
/// consecutive attempts, or `policy.max_attempts` is reached.
///
/// Returns the last observed item count.
pub async fn scroll_until_stable(
    browser: &dyn Browser,
    items: &Locator,
    policy: &ScrollPolicy,
) -> Result<usize, BrowserError> {
    let mut last_count = 0;
    let mut stable = 0;

    for attempt in 1..=policy.max_attempts {
        browser.scroll_by(policy.step_px).await?;
        sleep(Duration::from_millis(policy.settle_delay_ms)).await;

        let count = browser.count(items).await?;
        if count <= last_count {
            stable += 1;
            if stable >= policy.stable_rounds {
                debug!("Lazy loading settled at {} items after {} attempts", count, attempt);
                return Ok(count);
            }
        } else {
            stable = 0;
            last_count = count;
        }
    }

    debug!("Stopped scrolling after {} attempts with {} items", policy.max_attempts, last_count);
    Ok(last_count)
}

/// Scroll a fixed number of times for sites that expose no item count
pub async fn scroll_fixed(browser: &dyn Browser, policy: &ScrollPolicy) -> Result<usize, BrowserError> {
    for _ in 0..policy.max_attempts {
        browser.scroll_by(policy.step_px).await?;
        sleep(Duration::from_millis(policy.settle_delay_ms)).await;
    }
    Ok(0)
}
