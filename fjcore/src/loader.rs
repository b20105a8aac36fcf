//! Recursively resolves `include` items (§4.1) into a single flat item
//! tree, splicing each included file's items in as a nested
//! [`ast::Item::Block`]. Parsing itself stays pure (no filesystem access);
//! this module is the seam where source text actually gets read, via a
//! pluggable [`SourceLoader`] so callers can supply in-memory sources in
//! tests.

use crate::ast::{self, Item};
use crate::diag::Files;
use crate::error::ParseError;
use crate::expr::ExprArena;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub trait SourceLoader {
    fn load(&self, path: &Path) -> std::io::Result<String>;
    fn resolve_include(&self, from: &Path, include_path: &str) -> PathBuf;
}

#[derive(Debug, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn resolve_include(&self, from: &Path, include_path: &str) -> PathBuf {
        match from.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(include_path),
            _ => PathBuf::from(include_path),
        }
    }
}

/// Parses `root` and every file it (transitively) includes, returning one
/// `ast::File` with `Include` items already spliced in as nested blocks.
/// A file already included earlier on the same path is included only
/// once, mirroring a header guard.
pub fn load_and_resolve(
    root: &Path,
    loader: &dyn SourceLoader,
    files: &mut Files,
    arena: &mut ExprArena,
) -> Result<ast::File, ParseError> {
    let source = loader.load(root)?;
    let mut seen = HashSet::new();
    seen.insert(root.to_path_buf());
    let file_id = files.add(root.to_path_buf());
    let parsed = crate::parser::parse(&source, file_id, arena)?;
    let items = resolve_includes(parsed.items, root, loader, files, arena, &mut seen)?;
    Ok(ast::File { items })
}

fn resolve_includes(
    items: Vec<Item>,
    current_file: &Path,
    loader: &dyn SourceLoader,
    files: &mut Files,
    arena: &mut ExprArena,
    seen: &mut HashSet<PathBuf>,
) -> Result<Vec<Item>, ParseError> {
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Item::Include(include) => {
                let inc_path = loader.resolve_include(current_file, &include.path);
                if !seen.insert(inc_path.clone()) {
                    continue;
                }
                let source = loader.load(&inc_path).map_err(|_| ParseError::Include {
                    path: include.path.clone(),
                    loc: include.loc,
                })?;
                let file_id = files.add(inc_path.clone());
                let parsed = crate::parser::parse(&source, file_id, arena)?;
                let nested = resolve_includes(parsed.items, &inc_path, loader, files, arena, seen)?;
                resolved.push(Item::Block(nested));
            }
            Item::Block(block_items) => {
                let nested = resolve_includes(block_items, current_file, loader, files, arena, seen)?;
                resolved.push(Item::Block(nested));
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemLoader(RefCell<HashMap<PathBuf, String>>);

    impl SourceLoader for MemLoader {
        fn load(&self, path: &Path) -> std::io::Result<String> {
            self.0
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))
        }

        fn resolve_include(&self, _from: &Path, include_path: &str) -> PathBuf {
            PathBuf::from(include_path)
        }
    }

    #[test]
    fn splices_included_items() {
        let mut files_map = HashMap::new();
        files_map.insert(PathBuf::from("main.fj"), "include \"lib.fj\";\n0;0\n".to_owned());
        files_map.insert(PathBuf::from("lib.fj"), "start:\n".to_owned());
        let loader = MemLoader(RefCell::new(files_map));

        let mut files = Files::new();
        let mut arena = ExprArena::new();
        let file = load_and_resolve(Path::new("main.fj"), &loader, &mut files, &mut arena).unwrap();
        assert_eq!(file.items.len(), 2);
        assert!(matches!(file.items[0], Item::Block(_)));
    }

    #[test]
    fn macro_defined_in_an_included_file_is_callable() {
        let mut files_map = HashMap::new();
        files_map.insert(
            PathBuf::from("main.fj"),
            "include \"macros.fj\";\nstart:\nhelper();\nIO:\n".to_owned(),
        );
        files_map.insert(PathBuf::from("macros.fj"), "def helper() {\n  0;0\n}\n".to_owned());
        let loader = MemLoader(RefCell::new(files_map));

        let mut files = Files::new();
        let mut arena = ExprArena::new();
        let file = load_and_resolve(Path::new("main.fj"), &loader, &mut files, &mut arena).unwrap();

        let mut registry = crate::macros::MacroRegistry::new();
        crate::macros::collect_macros(&file.items, &crate::preprocess::top_level_namespace(), &mut registry);

        let mut stack_arena = crate::diag::StackArena::new();
        let items = crate::preprocess::preprocess(
            &file,
            &registry,
            &mut arena,
            &mut stack_arena,
            crate::preprocess::PreprocessConfig::default(),
        )
        .unwrap();
        assert!(items
            .iter()
            .any(|item| matches!(item, crate::preprocess::PreprocItem::Op { .. })));
    }

    #[test]
    fn missing_include_is_reported() {
        let mut files_map = HashMap::new();
        files_map.insert(PathBuf::from("main.fj"), "include \"missing.fj\";\n".to_owned());
        let loader = MemLoader(RefCell::new(files_map));

        let mut files = Files::new();
        let mut arena = ExprArena::new();
        let err = load_and_resolve(Path::new("main.fj"), &loader, &mut files, &mut arena).unwrap_err();
        assert!(matches!(err, ParseError::Include { .. }));
    }
}
