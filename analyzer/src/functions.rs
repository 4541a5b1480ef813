//! Splits decompiler output into per-function blocks.
//!
//! The decompiler emits one flat text document. A block begins at the
//! first line containing `{` while outside a block, and ends at the
//! first subsequent line containing `}`. The opening line doubles as the
//! function's name key in the pseudocode cache.

/// One function block cut out of the decompiled text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBlock {
    /// The full signature line, trimmed. Used as the cache key together
    /// with the contract address.
    pub name: String,
    /// The block's lines, opening and closing line included.
    pub body: String,
}

/// Line-oriented scan over the decompiled text. Nested braces are not
/// tracked: the first closing line terminates the block, which matches
/// the flat shape of the decompiler's output.
pub fn split_functions(raw: &str) -> Vec<FunctionBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut name = "";
    let mut in_block = false;

    for line in raw.lines() {
        if !in_block && line.contains('{') {
            name = line;
            in_block = true;
            current.clear();
        }
        if in_block {
            current.push(line);
            if line.contains('}') {
                blocks.push(FunctionBlock {
                    name: name.trim().to_string(),
                    body: current.join("\n"),
                });
                in_block = false;
            }
        }
    }

    blocks
}

// ── Tests ────────────────────────────────────────────────────────
