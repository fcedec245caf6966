// Acquisition engine: keep buying one instrument with immediate-or-cancel
// orders whenever the best ask is under the reference price, until the
// target quantity has been filled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::retry::RetryPolicy;
use super::signal::CancelSignal;
use super::types::{OrderRequest, OrderType, Quote};
use super::TradingVenue;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub target_quantity: u64,
    /// Strict ceiling: only asks below this price are taken.
    pub reference_price: u64,
    /// Pause after a cycle that did not trade.
    pub poll_interval: Duration,
    /// None = keep polling until filled or cancelled.
    pub max_cycles: Option<u64>,
    pub retry: RetryPolicy,
}

impl AcquisitionConfig {
    pub fn new(target_quantity: u64, reference_price: u64) -> Self {
        Self {
            target_quantity,
            reference_price,
            poll_interval: Duration::from_millis(100),
            max_cycles: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Progress of one run. `filled + remaining == target` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionState {
    target: u64,
    filled: u64,
}

impl AcquisitionState {
    pub fn new(target: u64) -> Self {
        Self { target, filled: 0 }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn filled(&self) -> u64 {
        self.filled
    }

    pub fn remaining(&self) -> u64 {
        self.target - self.filled
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Fold one order's fill total into the state. Returns the quantity accounted.
    pub fn record_fill(&mut self, filled: u64, requested: u64) -> u64 {
        let accepted = filled.min(requested).min(self.remaining());
        if accepted < filled {
            warn!(filled, requested, remaining = self.remaining(), "fill total exceeds request, clamping");
        }
        self.filled += accepted;
        accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderIntent {
    pub quantity: u64,
    pub price: u64,
}

/// Decide whether this quote is worth trading and how much to ask for.
pub fn evaluate_trigger(quote: &Quote, remaining: u64, reference_price: u64) -> Option<OrderIntent> {
    if remaining == 0 || quote.ask_depth == 0 {
        return None;
    }
    let ask = quote.ask?;
    if ask >= reference_price {
        return None;
    }
    Some(OrderIntent { quantity: remaining.min(quote.ask_depth), price: ask })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    CycleLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    QuoteFailed { cycle: u64, error: ApiError },
    Skipped { cycle: u64, ask: Option<u64>, ask_depth: u64 },
    SubmitFailed { cycle: u64, requested: u64, error: ApiError },
    OrderFilled { cycle: u64, order_id: u64, price: u64, requested: u64, filled: u64, remaining: u64 },
    Finished { outcome: Outcome, filled: u64, remaining: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub outcome: Outcome,
    pub state: AcquisitionState,
    pub cycles: u64,
    pub orders_submitted: u64,
}

/// Terminal failure. Carries whatever was bought before it happened.
#[derive(Debug, thiserror::Error)]
#[error("acquisition stopped after filling {} of {}: {source}", .state.filled(), .state.target())]
pub struct AcquisitionError {
    pub state: AcquisitionState,
    pub cycles: u64,
    #[source]
    pub source: ApiError,
}

enum Cycle {
    Traded { filled: u64 },
    Skipped,
    Failed,
}

/// Quote failures only end the run when the request itself was invalid.
fn ends_run_on_quote(e: &ApiError) -> bool {
    matches!(e, ApiError::Precondition(_))
}

/// An unreadable order response leaves the fill unknown, so the state can no
/// longer be trusted.
fn ends_run_on_submit(e: &ApiError) -> bool {
    matches!(e, ApiError::Precondition(_) | ApiError::Decode(_))
}

pub struct AcquisitionEngine<V: ?Sized> {
    venue: Arc<V>,
    config: AcquisitionConfig,
    cancel: CancelSignal,
    events: Option<mpsc::UnboundedSender<AcquisitionEvent>>,
}

impl<V: TradingVenue + ?Sized> AcquisitionEngine<V> {
    pub fn new(venue: Arc<V>, config: AcquisitionConfig) -> Self {
        Self { venue, config, cancel: CancelSignal::new(), events: None }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AcquisitionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    fn emit(&self, event: AcquisitionEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone just means nobody is listening any more.
            let _ = tx.send(event);
        }
    }

    #[instrument(skip(self), fields(target = self.config.target_quantity, reference = self.config.reference_price))]
    pub async fn run(&self) -> Result<AcquisitionReport, AcquisitionError> {
        let mut state = AcquisitionState::new(self.config.target_quantity);
        let mut cycles = 0u64;
        let mut orders_submitted = 0u64;
        info!("acquisition started");

        let outcome = loop {
            if state.is_done() {
                break Outcome::Completed;
            }
            if self.cancel.is_cancelled() {
                break Outcome::Cancelled;
            }
            if self.config.max_cycles.is_some_and(|max| cycles >= max) {
                break Outcome::CycleLimit;
            }
            cycles += 1;

            match self.cycle(cycles, &mut state, &mut orders_submitted).await {
                Ok(Cycle::Traded { filled }) if filled > 0 => {}
                // zero fill: the book moved, give it a moment
                Ok(Cycle::Traded { .. }) | Ok(Cycle::Skipped) => self.pause().await,
                Ok(Cycle::Failed) => {
                    metrics::counter!("chock_cycles_failed_total").increment(1);
                    self.pause().await;
                }
                Err(e) => {
                    error!(cycle = cycles, filled = state.filled(), error = %e, "acquisition aborted");
                    return Err(AcquisitionError { state, cycles, source: e });
                }
            }
        };

        info!(?outcome, cycles, filled = state.filled(), remaining = state.remaining(), "acquisition finished");
        self.emit(AcquisitionEvent::Finished { outcome, filled: state.filled(), remaining: state.remaining() });
        Ok(AcquisitionReport { outcome, state, cycles, orders_submitted })
    }

    async fn cycle(&self, cycle: u64, state: &mut AcquisitionState, orders_submitted: &mut u64) -> ApiResult<Cycle> {
        let quote = match self.config.retry.run("quote", || self.venue.quote()).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(cycle, error = %e, "quote fetch failed");
                self.emit(AcquisitionEvent::QuoteFailed { cycle, error: e.clone() });
                return if ends_run_on_quote(&e) { Err(e) } else { Ok(Cycle::Failed) };
            }
        };

        let Some(intent) = evaluate_trigger(&quote, state.remaining(), self.config.reference_price) else {
            debug!(cycle, ask = ?quote.ask, ask_depth = quote.ask_depth, "no trade this cycle");
            metrics::counter!("chock_cycles_skipped_total").increment(1);
            self.emit(AcquisitionEvent::Skipped { cycle, ask: quote.ask, ask_depth: quote.ask_depth });
            return Ok(Cycle::Skipped);
        };

        let request = OrderRequest::new(intent.quantity, OrderType::ImmediateOrCancel)?.with_price(intent.price);
        debug!(cycle, qty = intent.quantity, price = intent.price, "submitting IOC buy");

        // Only rate-limit rejections are retried: the service refused the order.
        // A transport failure may have reached the matcher, so resubmitting could double-buy.
        let order = match self
            .config
            .retry
            .run_when("order", ApiError::is_rate_limited, || self.venue.post_order(request))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(cycle, qty = intent.quantity, error = %e, "order submission failed");
                self.emit(AcquisitionEvent::SubmitFailed { cycle, requested: intent.quantity, error: e.clone() });
                return if ends_run_on_submit(&e) { Err(e) } else { Ok(Cycle::Failed) };
            }
        };
        *orders_submitted += 1;
        metrics::counter!("chock_orders_submitted_total").increment(1);

        let filled = state.record_fill(order.filled_quantity(), intent.quantity);
        metrics::counter!("chock_shares_filled_total").increment(filled);
        metrics::gauge!("chock_remaining_quantity").set(state.remaining() as f64);
        info!(
            cycle,
            order_id = order.id,
            price = intent.price,
            requested = intent.quantity,
            filled,
            remaining = state.remaining(),
            "order filled"
        );
        self.emit(AcquisitionEvent::OrderFilled {
            cycle,
            order_id: order.id,
            price: intent.price,
            requested: intent.quantity,
            filled,
            remaining: state.remaining(),
        });
        Ok(Cycle::Traded { filled })
    }

    async fn pause(&self) {
        if self.config.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            self.cancel.sleep(self.config.poll_interval).await;
        }
    }
}
