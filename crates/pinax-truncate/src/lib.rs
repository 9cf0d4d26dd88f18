//! Fair token-budget allocation across a set of named text items.
//!
//! Small items are protected in full; the shortfall is taxed proportionally
//! off items at or above the average deficit. When even the small items
//! alone overrun the budget, every item falls back to a flat proportional
//! scale.

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// One named text item going into the budget.
#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub content: String,
}

impl Item {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn tokens(&self) -> u64 {
        estimate_tokens(&self.content)
    }
}

/// `tokens = ceil(len(content) / 4)`.
pub fn estimate_tokens(content: &str) -> u64 {
    ((content.len() as u64) + 3) / 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    NoTruncation,
    Protection,
    Fallback,
}

/// The final budget and rendering decided for one item.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub name: String,
    pub allocated_tokens: f64,
    pub allocated_chars: u64,
    pub truncated: bool,
    pub protected: bool,
    /// The item's content, truncated to `allocated_chars` and suffixed with
    /// the truncation marker if `truncated` is set; otherwise the original
    /// content unchanged.
    pub rendered: String,
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub total_before: u64,
    pub target: i64,
    pub total_after: f64,
    pub items_protected: usize,
    pub items_truncated: usize,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub struct TruncationResult {
    pub allocations: Vec<Allocation>,
    pub stats: Stats,
}

fn render(content: &str, allocated_chars: u64) -> (String, bool) {
    let len = content.len() as u64;
    if allocated_chars >= len {
        return (content.to_string(), false);
    }
    let keep = allocated_chars.saturating_sub(TRUNCATION_MARKER.len() as u64) as usize;
    let keep = keep.min(content.len());
    let mut rendered = content[..keep].to_string();
    rendered.push_str(TRUNCATION_MARKER);
    (rendered, true)
}

/// Runs the progressive-tax allocation over `items` for a `target` token
/// budget, returning a per-item allocation plus aggregate statistics.
pub fn truncate(items: &[Item], target: i64) -> TruncationResult {
    if items.is_empty() {
        return TruncationResult {
            allocations: Vec::new(),
            stats: Stats {
                total_before: 0,
                target,
                total_after: 0.0,
                items_protected: 0,
                items_truncated: 0,
                mode: Mode::NoTruncation,
            },
        };
    }

    let tokens: Vec<u64> = items.iter().map(Item::tokens).collect();
    let total_before: u64 = tokens.iter().sum();

    if target <= 0 {
        let allocations = items
            .iter()
            .map(|item| Allocation {
                name: item.name.clone(),
                allocated_tokens: 0.0,
                allocated_chars: 0,
                truncated: !item.content.is_empty(),
                protected: false,
                rendered: if item.content.is_empty() {
                    String::new()
                } else {
                    render(&item.content, 0).0
                },
            })
            .collect::<Vec<_>>();
        let items_truncated = allocations.iter().filter(|a| a.truncated).count();
        return TruncationResult {
            allocations,
            stats: Stats {
                total_before,
                target,
                total_after: 0.0,
                items_protected: 0,
                items_truncated,
                mode: Mode::Fallback,
            },
        };
    }

    if total_before as i64 <= target {
        let allocations = items
            .iter()
            .zip(&tokens)
            .map(|(item, &t)| Allocation {
                name: item.name.clone(),
                allocated_tokens: t as f64,
                allocated_chars: t * 4,
                truncated: false,
                protected: false,
                rendered: item.content.clone(),
            })
            .collect();
        return TruncationResult {
            allocations,
            stats: Stats {
                total_before,
                target,
                total_after: total_before as f64,
                items_protected: 0,
                items_truncated: 0,
                mode: Mode::NoTruncation,
            },
        };
    }

    let target_u = target as u64;
    let n = items.len() as f64;
    let deficit = (total_before - target_u) as f64;
    let avg_tax = deficit / n;

    let below_sum: u64 = tokens.iter().filter(|&&t| (t as f64) < avg_tax).sum();

    let mode = if below_sum as i64 > target {
        Mode::Fallback
    } else {
        Mode::Protection
    };

    let scale = target as f64 / total_before as f64;
    let above_sum = (total_before - below_sum) as f64;

    let mut allocations = Vec::with_capacity(items.len());
    let mut items_protected = 0usize;
    let mut items_truncated = 0usize;
    let mut total_after = 0.0f64;

    for (item, &t) in items.iter().zip(&tokens) {
        let allocated_tokens = match mode {
            Mode::Fallback => (t as f64) * scale,
            Mode::Protection => {
                if (t as f64) < avg_tax {
                    t as f64
                } else {
                    (t as f64) - ((t as f64) / above_sum) * deficit
                }
            }
            Mode::NoTruncation => unreachable!(),
        };
        let protected = mode == Mode::Protection && (t as f64) < avg_tax;
        if protected {
            items_protected += 1;
        }

        let allocated_chars = (allocated_tokens * 4.0).floor().max(0.0) as u64;
        let (rendered, truncated) = render(&item.content, allocated_chars);
        if truncated {
            items_truncated += 1;
        }
        total_after += allocated_tokens;

        allocations.push(Allocation {
            name: item.name.clone(),
            allocated_tokens,
            allocated_chars,
            truncated,
            protected,
            rendered,
        });
    }

    TruncationResult {
        allocations,
        stats: Stats {
            total_before,
            target,
            total_after,
            items_protected,
            items_truncated,
            mode,
        },
    }
}
