//! Recovery of malformed model output.
//!
//! Repair is an ordered chain of strategies. Each strategy is total: it
//! returns `Some(value)` or `None` and never panics, so every link can be
//! tested on its own. The chain stops at the first success.
//!
//! 1. `AsIs`: parse the text unchanged
//! 2. `BalanceBrackets`: close whatever is still open (string, objects,
//!    arrays); if that does not parse, cut back to the last completed
//!    container and close from there
//! 3. `OuterArray`: parse the span from the first `[` to the last `]`

use serde_json::Value;
use thiserror::Error;

/// Upper bound on truncation points tried by `BalanceBrackets`
const MAX_CUT_ATTEMPTS: usize = 32;

/// All strategies failed
#[derive(Debug, Clone, Error)]
#[error("Model output could not be repaired ({length} chars): {preview}")]
pub struct RepairError {
    pub length: usize,
    pub preview: String,
}

impl RepairError {
    fn new(raw: &str) -> Self {
        Self {
            length: raw.len(),
            preview: raw.chars().take(80).collect(),
        }
    }
}

/// A link in the repair chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    AsIs,
    BalanceBrackets,
    OuterArray,
}

impl RepairStrategy {
    /// Chain order
    pub const CHAIN: [RepairStrategy; 3] = [
        RepairStrategy::AsIs,
        RepairStrategy::BalanceBrackets,
        RepairStrategy::OuterArray,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RepairStrategy::AsIs => "as_is",
            RepairStrategy::BalanceBrackets => "balance_brackets",
            RepairStrategy::OuterArray => "outer_array",
        }
    }

    /// Try this strategy alone
    pub fn attempt(&self, raw: &str) -> Option<Value> {
        match self {
            RepairStrategy::AsIs => parse(raw),
            RepairStrategy::BalanceBrackets => balance_brackets(raw),
            RepairStrategy::OuterArray => outer_array(raw),
        }
    }
}

/// A successfully recovered value and the strategy that produced it
#[derive(Debug, Clone)]
pub struct Repaired {
    pub value: Value,
    pub strategy: RepairStrategy,
}

/// Run the full chain
pub fn repair_json(raw: &str) -> Result<Repaired, RepairError> {
    RepairStrategy::CHAIN
        .iter()
        .find_map(|strategy| {
            strategy.attempt(raw).map(|value| Repaired {
                value,
                strategy: *strategy,
            })
        })
        .ok_or_else(|| RepairError::new(raw))
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Structural state of a JSON prefix
#[derive(Debug, Default)]
struct Scan {
    /// Open containers, innermost last
    stack: Vec<char>,
    in_string: bool,
    /// (byte offset just past a closing bracket, depth after closing)
    closes: Vec<(usize, usize)>,
}

fn scan(text: &str) -> Scan {
    let mut state = Scan::default();
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if state.in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                state.in_string = false;
            }
            continue;
        }

        match ch {
            '"' => state.in_string = true,
            '{' | '[' => state.stack.push(ch),
            '}' | ']' => {
                let opener = if ch == '}' { '{' } else { '[' };
                if state.stack.last() == Some(&opener) {
                    state.stack.pop();
                    state.closes.push((idx + 1, state.stack.len()));
                }
            }
            _ => {}
        }
    }

    state
}

/// Append the closers `text` is missing
fn close_open(text: &str) -> String {
    let state = scan(text);
    let mut closed = text.trim_end().to_string();

    if state.in_string {
        closed.push('"');
    } else {
        while closed.ends_with(',') {
            closed.pop();
            closed.truncate(closed.trim_end().len());
        }
    }

    for opener in state.stack.iter().rev() {
        closed.push(if *opener == '{' { '}' } else { ']' });
    }

    closed
}

fn balance_brackets(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Some(value) = parse(&close_open(raw)) {
        return Some(value);
    }

    // Cut back to a completed container, shallowest (whole elements) first
    let mut cuts: Vec<(usize, usize)> = scan(raw)
        .closes
        .into_iter()
        .filter(|(_, depth)| *depth > 0)
        .collect();
    cuts.sort_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

    cuts.into_iter()
        .take(MAX_CUT_ATTEMPTS)
        .find_map(|(end, _)| parse(&close_open(&raw[..end])))
}

fn outer_array(raw: &str) -> Option<Value> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    parse(&raw[start..=end])
}
