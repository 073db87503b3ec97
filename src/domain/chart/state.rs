//! Chart state container: app-owned, SDK-provided update logic.

use rust_decimal::Decimal;

use super::wire::{Candle, ChartMessage};

/// One point of a tick series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPoint {
    pub epoch: i64,
    pub quote: Decimal,
}

/// Folds chart messages into a tick series and a candle series.
///
/// History messages replace a series, live messages extend it; an update
/// carrying the same epoch as the last point overwrites that point.
#[derive(Debug, Clone, Default)]
pub struct ChartState {
    ticks: Vec<TickPoint>,
    candles: Vec<Candle>,
}

impl ChartState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &ChartMessage) {
        match message {
            ChartMessage::History { history } => {
                self.ticks = history
                    .times
                    .iter()
                    .zip(&history.prices)
                    .map(|(epoch, quote)| TickPoint {
                        epoch: *epoch,
                        quote: *quote,
                    })
                    .collect();
            }
            ChartMessage::Candles { candles } => {
                self.candles = candles.clone();
            }
            ChartMessage::Tick { tick } => {
                let point = TickPoint {
                    epoch: tick.epoch,
                    quote: tick.quote,
                };
                match self.ticks.last_mut() {
                    Some(last) if last.epoch == point.epoch => *last = point,
                    _ => self.ticks.push(point),
                }
            }
            ChartMessage::Ohlc { ohlc } => match self.candles.last_mut() {
                Some(last) if last.epoch == ohlc.epoch => *last = ohlc.clone(),
                _ => self.candles.push(ohlc.clone()),
            },
        }
    }

    pub fn ticks(&self) -> &[TickPoint] {
        &self.ticks
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last_quote(&self) -> Option<Decimal> {
        self.ticks.last().map(|p| p.quote)
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
        self.candles.clear();
    }
}
