//! Input combination generator
//!
//! Every unit of work is addressed by a single integer index. A tuple is
//! derived from its index alone, so any position can be recomputed at any
//! time (replay, verification) without touching a running job's cursor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::payloads::InputProvider;
use crate::error::ConfigError;

/// How provider values are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Cartesian product of all providers, last provider varying fastest
    #[default]
    Clusterbomb,
    /// Providers iterated in lockstep, bounded by the shortest
    Pitchfork,
    /// One provider, one template marker occurrence active at a time
    Sniper,
}

impl InputMode {
    pub fn all() -> &'static [InputMode] {
        &[InputMode::Clusterbomb, InputMode::Pitchfork, InputMode::Sniper]
    }

    pub fn name(&self) -> &'static str {
        match self {
            InputMode::Clusterbomb => "clusterbomb",
            InputMode::Pitchfork => "pitchfork",
            InputMode::Sniper => "sniper",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            InputMode::Clusterbomb => "All combinations of provider values",
            InputMode::Pitchfork => "Parallel iteration through providers",
            InputMode::Sniper => "Single marker position at a time with all values",
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for InputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InputMode::all()
            .iter()
            .copied()
            .find(|mode| mode.name() == s.trim().to_lowercase())
            .ok_or_else(|| ConfigError::InvalidMode(s.to_string()))
    }
}

/// Number of tuples a generator produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Total {
    Finite(u64),
    Unbounded,
}

impl Total {
    pub fn finite(&self) -> Option<u64> {
        match self {
            Total::Finite(n) => Some(*n),
            Total::Unbounded => None,
        }
    }

    fn contains(&self, index: u64) -> bool {
        match self {
            Total::Finite(n) => index < *n,
            Total::Unbounded => true,
        }
    }
}

impl fmt::Display for Total {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Total::Finite(n) => write!(f, "{}", n),
            Total::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// One unit of work: a value position per provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTuple {
    /// Generator index this tuple was derived from
    pub index: u64,
    /// Index into each provider, in provider order
    pub positions: Vec<usize>,
    /// Encoded value for each provider, in provider order
    pub values: Vec<String>,
    /// Marker occurrence receiving the value (sniper mode only)
    pub active_marker: Option<usize>,
}

/// Turns providers into an addressable stream of [`PositionTuple`]s
#[derive(Debug, Clone)]
pub struct Generator {
    mode: InputMode,
    providers: Vec<InputProvider>,
    marker_count: usize,
}

impl Generator {
    /// `marker_count` is the number of marker occurrences in the template;
    /// only sniper mode uses it.
    pub fn new(mode: InputMode, providers: Vec<InputProvider>, marker_count: usize) -> Self {
        Self {
            mode,
            providers,
            marker_count,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn providers(&self) -> &[InputProvider] {
        &self.providers
    }

    pub fn marker_count(&self) -> usize {
        self.marker_count
    }

    /// Total number of tuples
    pub fn total(&self) -> Total {
        if self.providers.is_empty() {
            return Total::Finite(0);
        }

        match self.mode {
            InputMode::Clusterbomb => {
                let mut product: u64 = 1;
                let mut unbounded = false;
                for provider in &self.providers {
                    match provider.cardinality() {
                        Some(0) => return Total::Finite(0),
                        Some(card) => match product.checked_mul(card as u64) {
                            Some(p) => product = p,
                            None => return Total::Unbounded,
                        },
                        None => unbounded = true,
                    }
                }
                if unbounded {
                    Total::Unbounded
                } else {
                    Total::Finite(product)
                }
            }
            InputMode::Pitchfork => self
                .providers
                .iter()
                .filter_map(|p| p.cardinality())
                .min()
                .map(|min| Total::Finite(min as u64))
                .unwrap_or(Total::Unbounded),
            InputMode::Sniper => match self.sniper_provider().and_then(|p| p.cardinality()) {
                Some(card) => Total::Finite(self.marker_count as u64 * card as u64),
                None if self.providers.len() == 1 => Total::Unbounded,
                None => Total::Finite(0),
            },
        }
    }

    /// Tuple at `index`, `None` at end of input. Pure: never mutates state
    /// observable through other indices.
    pub fn tuple_at(&self, index: u64) -> Option<PositionTuple> {
        let (positions, active_marker) = self.positions_at(index)?;

        let values = self
            .providers
            .iter()
            .zip(&positions)
            .map(|(provider, &pos)| provider.value_at(pos))
            .collect::<Option<Vec<_>>>()?;

        Some(PositionTuple {
            index,
            positions,
            values,
            active_marker,
        })
    }

    /// Wait until every provider can answer for `index` without blocking.
    /// Call before [`Generator::tuple_at`] from async code.
    pub async fn prepare(&self, index: u64) {
        let Some((positions, _)) = self.positions_at(index) else {
            return;
        };
        for (provider, &pos) in self.providers.iter().zip(&positions) {
            provider.prepare(pos).await;
        }
    }

    /// Per-provider positions and active marker for `index`
    fn positions_at(&self, index: u64) -> Option<(Vec<usize>, Option<usize>)> {
        if self.providers.is_empty() || !self.total().contains(index) {
            return None;
        }

        match self.mode {
            InputMode::Clusterbomb => Some((self.decompose(index)?, None)),
            InputMode::Pitchfork => Some((vec![usize::try_from(index).ok()?; self.providers.len()], None)),
            InputMode::Sniper => {
                let card = self.sniper_provider()?.cardinality()? as u64;
                if card == 0 {
                    return None;
                }
                let marker = (index / card) as usize;
                if marker >= self.marker_count {
                    return None;
                }
                Some((vec![(index % card) as usize], Some(marker)))
            }
        }
    }

    /// Inverse of [`Generator::tuple_at`]: index for per-provider positions
    pub fn index_of(&self, positions: &[usize], active_marker: Option<usize>) -> Option<u64> {
        if positions.len() != self.providers.len() || positions.is_empty() {
            return None;
        }

        let index = match self.mode {
            InputMode::Clusterbomb => {
                let mut index: u64 = 0;
                for (i, (provider, &pos)) in self.providers.iter().zip(positions).enumerate() {
                    match provider.cardinality() {
                        Some(card) if pos < card => {
                            index = index.checked_mul(card as u64)?.checked_add(pos as u64)?;
                        }
                        None if i == 0 => index = pos as u64,
                        _ => return None,
                    }
                }
                index
            }
            InputMode::Pitchfork => {
                let first = positions[0];
                if positions.iter().any(|&p| p != first) {
                    return None;
                }
                first as u64
            }
            InputMode::Sniper => {
                let card = self.sniper_provider()?.cardinality()?;
                let marker = active_marker?;
                if positions[0] >= card || marker >= self.marker_count {
                    return None;
                }
                (marker * card + positions[0]) as u64
            }
        };

        self.total().contains(index).then_some(index)
    }

    /// Recover the index that produced `values` by searching each bounded
    /// provider for the (encoded) value
    pub fn locate(&self, values: &[String], active_marker: Option<usize>) -> Option<u64> {
        if values.len() != self.providers.len() {
            return None;
        }
        let positions = self
            .providers
            .iter()
            .zip(values)
            .map(|(provider, value)| {
                let card = provider.cardinality()?;
                (0..card).find(|&i| provider.value_at(i).as_deref() == Some(value.as_str()))
            })
            .collect::<Option<Vec<_>>>()?;
        self.index_of(&positions, active_marker)
    }

    /// Iterate every tuple from index 0
    pub fn iter(&self) -> impl Iterator<Item = PositionTuple> + '_ {
        (0u64..).map_while(move |i| self.tuple_at(i))
    }

    fn sniper_provider(&self) -> Option<&InputProvider> {
        match self.providers.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// Mixed-radix decomposition, last provider least significant. Only the
    /// first provider may be unbounded; it absorbs the remaining quotient.
    fn decompose(&self, index: u64) -> Option<Vec<usize>> {
        let mut positions = vec![0usize; self.providers.len()];
        let mut rem = index;
        for (i, provider) in self.providers.iter().enumerate().rev() {
            match provider.cardinality() {
                Some(card) => {
                    let card = card as u64;
                    positions[i] = (rem % card) as usize;
                    rem /= card;
                }
                None if i == 0 => {
                    positions[i] = usize::try_from(rem).ok()?;
                    rem = 0;
                }
                None => return None,
            }
        }
        (rem == 0).then_some(positions)
    }
}
