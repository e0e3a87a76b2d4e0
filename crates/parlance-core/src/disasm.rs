//! Minimal textual disassembly used by the CLI and by debug logs.

use crate::program::{Instruction, Node, Program};

#[cfg(not(feature = "std"))]
use alloc::{format, string::String};
#[cfg(feature = "std")]
use std::{format, string::String};

use core::fmt::Write;

/// Multi-line listing of a whole program, nodes in name order.
pub fn disassemble_program(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== program == (nodes={}, strings={}, variables={})",
        program.nodes.len(),
        program.strings.len(),
        program.initial_values.len()
    );
    if !program.initial_values.is_empty() {
        let _ = writeln!(out, ";; initial values");
        for (name, value) in &program.initial_values {
            let _ = writeln!(out, "{name} = {value}");
        }
    }
    for node in program.nodes.values() {
        let _ = writeln!(out);
        out.push_str(&disassemble_node(node, Some(program)));
    }
    out
}

/// Listing of a single node. With a program, line ids are annotated with their text.
pub fn disassemble_node(node: &Node, program: Option<&Program>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} == (ops={})", node.name, node.instructions.len());
    if let Some(var) = &node.tracking_variable {
        let _ = writeln!(out, ";; tracking: {var}");
    }
    for (pc, instruction) in node.instructions.iter().enumerate() {
        if let Some(label) = node.labels.get(&pc) {
            let _ = writeln!(out, "{label}:");
        }
        let preview = match instruction {
            Instruction::RunLine { line_id, .. } | Instruction::AddOption { line_id, .. } => {
                program.and_then(|p| p.line_text(line_id)).map(show_text)
            }
            _ => None,
        };
        match preview {
            Some(p) => {
                let _ = writeln!(out, "{pc:04} | {} ;; {p}", operands(instruction));
            }
            None => {
                let _ = writeln!(out, "{pc:04} | {}", operands(instruction));
            }
        }
    }
    out
}

fn operands(instruction: &Instruction) -> String {
    let m = instruction.mnemonic();
    match instruction {
        Instruction::PushNumber(n) => format!("{m} {n}"),
        Instruction::PushString(s) => format!("{m} {}", show_text(s)),
        Instruction::PushBool(b) => format!("{m} {b}"),
        Instruction::PushVariable { name }
        | Instruction::StoreVariable { name }
        | Instruction::CallFunction { name }
        | Instruction::RunNode { name }
        | Instruction::DetourToNode { name } => format!("{m} {name}"),
        Instruction::JumpTo { destination } | Instruction::JumpIfFalse { destination } => {
            format!("{m} {destination}")
        }
        Instruction::RunLine { line_id, substitutions } => format!("{m} {line_id} ({substitutions})"),
        Instruction::RunCommand { text, substitutions } => format!("{m} {} ({substitutions})", show_text(text)),
        Instruction::AddOption { line_id, destination, substitutions, has_condition } => {
            format!("{m} {line_id} -> {destination} ({substitutions}){}", if *has_condition { " if" } else { "" })
        }
        Instruction::AddSaliencyCandidate { content_id, complexity, destination } => {
            format!("{m} {content_id} -> {destination} (complexity {complexity})")
        }
        _ => String::from(m),
    }
}

fn show_text(s: &str) -> String {
    if s.chars().count() <= 48 {
        format!("\"{s}\"")
    } else {
        let cut: String = s.chars().take(48).collect();
        format!("\"{cut}…\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::LineInfo;

    #[test]
    fn listing_shows_labels_and_line_text() {
        let mut p = Program::new();
        let mut n = Node::new("Start");
        n.label_here("entry");
        n.emit(Instruction::RunLine { line_id: "line:a".into(), substitutions: 0 });
        n.emit(Instruction::Return);
        p.strings.insert(
            "line:a".into(),
            LineInfo { text: "Hello".into(), file: "intro.parl".into(), node: "Start".into(), line_number: 3, tags: vec![] },
        );
        p.insert_node(n).unwrap();

        let text = disassemble_program(&p);
        assert!(text.contains("entry:\n0000 | RunLine line:a (0) ;; \"Hello\""));
        assert!(text.contains("0001 | Return"));
    }
}
