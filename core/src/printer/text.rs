//! Human-readable pseudo-assembly.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write};

use crate::assembly::Assembly;
use crate::item::AssemblyItem;
use crate::location::SourceLocation;

/// Source text by source name, used to quote the code behind each location.
pub type SourceCodes = BTreeMap<String, String>;

/// `Display` adapter rendering an assembly tree.
pub struct AssemblyText<'a> {
    assembly: &'a Assembly,
    sources: &'a SourceCodes,
}

impl<'a> AssemblyText<'a> {
    pub fn new(assembly: &'a Assembly, sources: &'a SourceCodes) -> Self {
        Self { assembly, sources }
    }
}

impl Display for AssemblyText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_assembly(f, self.assembly, "", self.sources)
    }
}

/// Folds operand pushes into call syntax while every operand is still pending.
struct Functionaliser<'a, W: Write> {
    out: &'a mut W,
    prefix: &'a str,
    sources: &'a SourceCodes,
    pending: Vec<String>,
    location: SourceLocation,
}

impl<W: Write> Functionaliser<'_, W> {
    fn feed(&mut self, item: &AssemblyItem) -> fmt::Result {
        if item.location().is_valid() && item.location() != &self.location {
            self.flush()?;
            self.location = item.location().clone();
            self.print_location()?;
        }
        let arguments = item.arguments();
        if !(item.can_be_functional() && item.return_values() <= 1 && arguments <= self.pending.len()) {
            self.flush()?;
            let indent = if item.is_tag() { "" } else { "  " };
            return writeln!(self.out, "{}{}{}", self.prefix, indent, item.to_assembly_text());
        }
        let mut expression = item.to_assembly_text();
        if arguments > 0 {
            let operands: Vec<String> = (0..arguments).filter_map(|_| self.pending.pop()).collect();
            expression = format!("{expression}({})", operands.join(", "));
        }
        self.pending.push(expression);
        if item.return_values() != 1 {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> fmt::Result {
        for expression in self.pending.drain(..) {
            writeln!(self.out, "{}  {}", self.prefix, expression)?;
        }
        Ok(())
    }

    fn print_location(&mut self) -> fmt::Result {
        let location = &self.location;
        write!(self.out, "{}    /*", self.prefix)?;
        if let Some(source) = location.source_name() {
            write!(self.out, " \"{source}\"")?;
        }
        if location.has_text() {
            write!(self.out, ":{}:{}", location.start, location.end)?;
        }
        writeln!(self.out, "  {} */", snippet(self.sources, location))
    }
}

/// First line of the located text, `...` marking a cut.
fn snippet(sources: &SourceCodes, location: &SourceLocation) -> String {
    if !location.has_text() {
        return String::new();
    }
    let Some(source) = location.source_name().and_then(|name| sources.get(name)) else {
        return String::new();
    };
    let (start, end) = (location.start as usize, (location.end as usize).min(source.len()));
    let Some(cut) = source.get(start..end) else {
        return String::new();
    };
    match cut.split_once('\n') {
        Some((line, _)) => format!("{line}..."),
        None => cut.to_string(),
    }
}

fn write_assembly<W: Write>(out: &mut W, assembly: &Assembly, prefix: &str, sources: &SourceCodes) -> fmt::Result {
    let mut functionaliser = Functionaliser {
        out: &mut *out,
        prefix,
        sources,
        pending: Vec::new(),
        location: SourceLocation::unknown(),
    };
    for item in assembly.items() {
        functionaliser.feed(item)?;
    }
    functionaliser.flush()?;

    if !assembly.data().is_empty() || !assembly.subs().is_empty() {
        writeln!(out, "{prefix}stop")?;
        for (key, blob) in assembly.data() {
            writeln!(out, "{prefix}data_{key:x} {}", hex::encode(blob))?;
        }
        let nested = format!("{prefix}    ");
        for (index, sub) in assembly.subs().iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "{prefix}sub_{index}: assembly {{")?;
            write_assembly(out, sub, &nested, sources)?;
            writeln!(out, "{prefix}}}")?;
        }
    }

    if !assembly.auxiliary_data().is_empty() {
        writeln!(out)?;
        writeln!(out, "{prefix}auxdata: 0x{}", hex::encode(assembly.auxiliary_data()))?;
    }
    Ok(())
}

impl Assembly {
    pub fn assembly_text(&self, sources: &SourceCodes) -> String {
        AssemblyText::new(self, sources).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    #[test]
    fn operands_fold_into_calls() {
        let mut asm = Assembly::new();
        asm.append_push(1u64).unwrap();
        asm.append_push(2u64).unwrap();
        asm.append(Instruction::ADD).unwrap();
        asm.append(Instruction::POP).unwrap();
        let tag = asm.new_tag().unwrap();
        asm.append(tag).unwrap();
        asm.append(Instruction::STOP).unwrap();
        let text = asm.assembly_text(&SourceCodes::new());
        assert_eq!(text, "  pop(add(0x02, 0x01))\ntag_1:\n  stop\n");
    }

    #[test]
    fn dup_breaks_the_expression() {
        let mut asm = Assembly::new();
        asm.append_push(7u64).unwrap();
        asm.append(Instruction::dup(1)).unwrap();
        let text = asm.assembly_text(&SourceCodes::new());
        assert_eq!(text, "  0x07\n  dup1\n");
    }

    #[test]
    fn locations_open_comment_blocks_with_snippets() {
        let mut sources = SourceCodes::new();
        sources.insert("a.sol".to_string(), "x = 1;\ny = 2;".to_string());
        let mut asm = Assembly::new();
        asm.set_source_location(SourceLocation::new("a.sol", 0, 9));
        asm.append(Instruction::CALLER).unwrap();
        asm.append(Instruction::POP).unwrap();
        let text = asm.assembly_text(&sources);
        assert_eq!(text, "    /* \"a.sol\":0:9  x = 1;... */\n  pop(caller)\n");
    }

    #[test]
    fn subs_data_and_auxdata_follow_the_code() {
        let mut sub = Assembly::new();
        sub.append(Instruction::STOP).unwrap();
        let mut asm = Assembly::new();
        let push = asm.new_sub(sub).unwrap();
        asm.append(push).unwrap();
        asm.append(Instruction::POP).unwrap();
        asm.append_auxiliary_data_to_end(&[0xa1, 0x65]).unwrap();
        let text = asm.assembly_text(&SourceCodes::new());
        assert_eq!(
            text,
            "  pop(dataOffset(sub_0))\nstop\n\nsub_0: assembly {\n      stop\n}\n\nauxdata: 0xa165\n"
        );
    }
}
