//! Human-readable rendering of a translation tree.

use crate::entry::EntryKind;
use crate::level::Level;
use crate::walk::WalkStack;
use crate::PhysMapper;
use core::fmt;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Lists every present entry below a root, one line each, indented by depth.
///
/// ```text
/// L3[  0] 0x0000000000000000 -> table 0x0000001000001000/4K MapFlags(WRITEABLE)
///   L2[  0] 0x0000000000000000 -> table 0x0000001000002000/4K MapFlags(WRITEABLE)
///     L1[  1] 0x0000000000200000 -> 0x0000000000200000 2M MapFlags(WRITEABLE | HUGE)
/// ```
pub struct TableDump<'a, M: PhysMapper> {
    phys: &'a M,
    root: PhysicalPage<Size4K>,
}

impl<'a, M: PhysMapper> TableDump<'a, M> {
    pub(crate) const fn new(phys: &'a M, root: PhysicalPage<Size4K>) -> Self {
        Self { phys, root }
    }
}

impl<M: PhysMapper> fmt::Display for TableDump<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = WalkStack::starting_at(self.root, VirtualAddress::zero());
        while let Some((frame, index)) = stack.current() {
            let level = stack.level();
            // Safety: only frames linked from the root are visited.
            let entry = unsafe { self.phys.table(frame) }.load(index);
            let indent = 2 * (Level::ROOT.as_usize() - level.as_usize());
            let va = stack.address();

            match entry.kind(level) {
                EntryKind::NotPresent => {}
                EntryKind::Leaf { frame: target, flags } => {
                    writeln!(
                        f,
                        "{:indent$}{level}[{index}] {va} -> {target} {} {flags:?}",
                        "",
                        level.size_name()
                    )?;
                }
                EntryKind::Table(child) => {
                    writeln!(
                        f,
                        "{:indent$}{level}[{index}] {va} -> table {child} {:?}",
                        "",
                        entry.map_flags(level)
                    )?;
                    stack.descend(child, va);
                    continue;
                }
            }
            stack.advance();
        }
        Ok(())
    }
}
