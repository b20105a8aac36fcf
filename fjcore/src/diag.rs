//! Source locations, interned file table, and the tail-shared macro-stack
//! arena used to attach a "how did we get here" trail to diagnostics.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

/// Index into a [`Files`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A parsed/preprocessed file's path, kept around purely for diagnostics.
#[derive(Debug, Default)]
pub struct Files {
    paths: Vec<PathBuf>,
}

impl Files {
    pub fn new() -> Files {
        Files::default()
    }

    pub fn add(&mut self, path: PathBuf) -> FileId {
        let id = FileId(self.paths.len() as u32);
        self.paths.push(path);
        id
    }

    pub fn path(&self, id: FileId) -> &std::path::Path {
        &self.paths[id.0 as usize]
    }
}

/// `(file, line, column)`, 1-based line/column per convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: FileId, line: u32, column: u32) -> SourceLocation {
        SourceLocation { file, line, column }
    }
}

/// A dotted, namespaced identifier. Segments are reference-counted so that
/// cloning a name mid-expansion (common: every substituted reference clones
/// its target name) is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FqName(Rc<Vec<Rc<str>>>);

impl FqName {
    pub fn simple(segment: impl Into<Rc<str>>) -> FqName {
        FqName(Rc::new(vec![segment.into()]))
    }

    pub fn join(&self, segment: impl Into<Rc<str>>) -> FqName {
        let mut segments = (*self.0).clone();
        segments.push(segment.into());
        FqName(Rc::new(segments))
    }

    pub fn segments(&self) -> &[Rc<str>] {
        &self.0
    }

    pub fn arity_key(&self, arity: usize) -> (FqName, usize) {
        (self.clone(), arity)
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

/// Index into a [`StackArena`]; `None` (outside the arena) means "top
/// level, no enclosing macro invocation".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrameId(pub u32);

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub parent: Option<StackFrameId>,
    pub macro_name: FqName,
    pub call_site: SourceLocation,
}

/// Tail-shared linked macro-invocation chain: every frame stores only its
/// parent's index, so per-op stacks reuse common prefixes instead of each
/// copying the whole chain.
#[derive(Debug, Default)]
pub struct StackArena {
    frames: Vec<StackFrame>,
}

impl StackArena {
    pub fn new() -> StackArena {
        StackArena::default()
    }

    pub fn push(
        &mut self,
        parent: Option<StackFrameId>,
        macro_name: FqName,
        call_site: SourceLocation,
    ) -> StackFrameId {
        let id = StackFrameId(self.frames.len() as u32);
        self.frames.push(StackFrame {
            parent,
            macro_name,
            call_site,
        });
        id
    }

    pub fn frame(&self, id: StackFrameId) -> &StackFrame {
        &self.frames[id.0 as usize]
    }

    /// Walks from `id` to the root, innermost frame first.
    pub fn trace(&self, id: Option<StackFrameId>) -> Vec<&StackFrame> {
        let mut out = Vec::new();
        let mut cur = id;
        while let Some(frame_id) = cur {
            let frame = self.frame(frame_id);
            out.push(frame);
            cur = frame.parent;
        }
        out
    }

    pub fn depth(&self, id: Option<StackFrameId>) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(frame_id) = cur {
            depth += 1;
            cur = self.frame(frame_id).parent;
        }
        depth
    }
}
