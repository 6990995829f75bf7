use std::collections::HashMap;

use anyhow::Result;
use log::debug;

use crate::asg::GraphNode;
use crate::errors::Session;
use crate::local::{self, LocalVars};
use crate::section::Sections;
use crate::types::TypeInfo;
use crate::x86;

/// Monotonic label counter. Never reset between functions so numeric
/// labels stay unique across the translation unit.
#[derive(Debug, Default)]
pub struct LabelCounter(u32);

impl LabelCounter {
    pub fn next(&mut self) -> u32 {
        let n = self.0;
        self.0 += 1;
        n
    }
}

/// Unique string literals and their data-section labels.
#[derive(Debug, Default)]
pub struct StringTable {
    index: HashMap<String, u32>,
    order: Vec<(u32, String)>,
}

impl StringTable {
    pub fn intern(&mut self, lexeme: &str, labels: &mut LabelCounter) -> u32 {
        if let Some(label) = self.index.get(lexeme) {
            return *label;
        }
        let label = labels.next();
        self.index.insert(lexeme.to_owned(), label);
        self.order.push((label, lexeme.to_owned()));
        label
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Byte offset of the first parameter relative to `%ebp`: above the
/// saved base pointer and the return address.
const PARAM_BASE_OFFSET: i32 = 8;

pub struct Param {
    pub name: String,
    pub ty: TypeInfo,
}

/// Accumulated output of one compilation: the section buffers, the
/// label counter shared by every function, and the interned string
/// literals awaiting their data-section entries.
pub struct TranslationUnit {
    sections: Sections,
    labels: LabelCounter,
    strings: StringTable,
}

impl TranslationUnit {
    pub fn new() -> Self {
        TranslationUnit {
            sections: Sections::new(),
            labels: LabelCounter::default(),
            strings: StringTable::default(),
        }
    }

    /// Translate one function body to x86 and append it to the text
    /// section.
    pub fn translate_function(
        &mut self,
        sess: &Session,
        name: &str,
        params: &[Param],
        graph: Option<&GraphNode>,
    ) -> Result<()> {
        let mut locals = LocalVars::new();
        for (i, param) in params.iter().enumerate() {
            locals.add_param(
                &param.name,
                param.ty.clone(),
                PARAM_BASE_OFFSET + 4 * i as i32,
            );
        }

        local::scan_graph(&mut locals, graph);
        let frame = local::layout_frame(&mut locals, sess, name);

        let mut seq = x86::Sequence::new(
            &mut locals,
            &mut self.labels,
            &mut self.strings,
            frame,
        );
        seq.begin_function(name);
        seq.grow_stack();
        seq.translate_graph(graph)?;
        seq.finish_function();

        for ins in seq.finish() {
            let line = x86::render(&ins);
            debug!("asm: {}", line.trim_end());
            self.sections.text_mut().write(&line);
        }
        Ok(())
    }

    /// Emit the interned string literals into the data section and
    /// hand back the finished sections.
    pub fn finish(mut self) -> Sections {
        if !self.strings.is_empty() {
            for (label, lexeme) in &self.strings.order {
                self.sections
                    .data_mut()
                    .write(&format!(".L{label}:\n\t.string \"{lexeme}\"\n"));
            }
        }
        self.sections
    }
}

impl Default for TranslationUnit {
    fn default() -> Self {
        TranslationUnit::new()
    }
}
