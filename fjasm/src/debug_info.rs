//! Sidecar serialization of the label table and per-address macro-stack
//! trace, per §6's `-d <path>` flag. Round-trips through `serde_json`
//! rather than a bespoke binary format, since the debug file is a
//! developer-facing artifact, not part of the byte-exact `.fjm` contract.

use fjcore::diag::{FqName, StackArena, StackFrameId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Resolved label name -> bit address, stored as a decimal string since
    /// addresses may exceed `u64` at very large widths.
    pub labels: HashMap<String, String>,
    /// Op start address -> macro call stack, innermost frame first, each
    /// rendered as `"name @ file:line:col"`.
    pub stacks: HashMap<String, Vec<String>>,
}

impl DebugInfo {
    pub fn build(
        labels: &HashMap<FqName, num_bigint::BigInt>,
        op_stacks: &HashMap<u128, Option<StackFrameId>>,
        stack_arena: &StackArena,
        files: &fjcore::diag::Files,
    ) -> DebugInfo {
        let labels = labels
            .iter()
            .map(|(name, addr)| (name.to_string(), addr.to_string()))
            .collect();

        let stacks = op_stacks
            .iter()
            .map(|(addr, stack)| {
                let trace = stack_arena
                    .trace(*stack)
                    .into_iter()
                    .map(|frame| {
                        let path = files.path(frame.call_site.file).display();
                        format!(
                            "{} @ {}:{}:{}",
                            frame.macro_name, path, frame.call_site.line, frame.call_site.column
                        )
                    })
                    .collect();
                (addr.to_string(), trace)
            })
            .collect();

        DebugInfo { labels, stacks }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }

    pub fn read<R: Read>(reader: R) -> serde_json::Result<DebugInfo> {
        serde_json::from_reader(reader)
    }
}
