//! OpenCL C kernel signature parsing.
//!
//! A lightweight heuristic parser, not a C99 front-end. It extracts the
//! `__kernel` entry points and their parameter lists so the host driver can
//! "compile" programs, resolve entry points and type-check arguments without
//! an OpenCL runtime.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// OpenCL address-space qualifier for a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgQualifier {
    Global,
    Local,
    Private,
    Constant,
}

impl fmt::Display for ArgQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgQualifier::Global => write!(f, "__global"),
            ArgQualifier::Local => write!(f, "__local"),
            ArgQualifier::Private => write!(f, "__private"),
            ArgQualifier::Constant => write!(f, "__constant"),
        }
    }
}

/// A single kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArg {
    pub name: String,
    pub qualifier: ArgQualifier,
    /// Declared type without the pointer star, e.g. `const int`.
    pub type_name: String,
    pub is_pointer: bool,
}

impl KernelArg {
    /// The type with `const`/`volatile`/`restrict` stripped, e.g. `int`.
    pub fn base_type(&self) -> String {
        self.type_name
            .split_whitespace()
            .filter(|t| !matches!(*t, "const" | "volatile" | "restrict" | "__restrict"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Size in bytes of a by-value parameter of this type, if it is a known
    /// scalar. Pointer parameters always take a memory-object handle.
    pub fn value_size(&self) -> Option<usize> {
        if self.is_pointer {
            return None;
        }
        scalar_size(&self.base_type())
    }
}

/// Byte size of an OpenCL C scalar type name.
pub fn scalar_size(base_type: &str) -> Option<usize> {
    match base_type {
        "char" | "uchar" | "unsigned char" | "bool" => Some(1),
        "short" | "ushort" | "unsigned short" | "half" => Some(2),
        "int" | "uint" | "unsigned int" | "unsigned" | "float" => Some(4),
        "long" | "ulong" | "unsigned long" | "double" | "size_t" => Some(8),
        _ => None,
    }
}

/// A parsed `__kernel` function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub args: Vec<KernelArg>,
}

/// Extract every `__kernel` function signature from `source`.
pub fn parse_kernel_signatures(source: &str) -> Vec<KernelSignature> {
    let stripped = strip_line_comments(&strip_block_comments(source));

    let mut signatures = Vec::new();
    let mut search_from = 0;
    while let Some(pos) = find_kernel_keyword(&stripped[search_from..]) {
        let (abs_pos, keyword_len) = (search_from + pos.0, pos.1);
        if let Some(sig) = try_parse_kernel(&stripped[abs_pos + keyword_len..]) {
            signatures.push(sig);
        }
        search_from = abs_pos + keyword_len;
    }
    signatures
}

/// Position and length of the next `__kernel` or bare `kernel` keyword.
fn find_kernel_keyword(s: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(rel) = s[from..].find("kernel") {
        let at = from + rel;
        let (start, len) = if s[..at].ends_with("__") { (at - 2, 8) } else { (at, 6) };
        let before_ok = s[..start].chars().next_back().map_or(true, |c| !is_ident_char(c));
        let after_ok = s[at + 6..].chars().next().map_or(true, |c| !is_ident_char(c));
        if before_ok && after_ok {
            return Some((start, len));
        }
        from = at + 6;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn try_parse_kernel(text: &str) -> Option<KernelSignature> {
    // return type, usually `void`
    let (_, rest) = split_first_word(text)?;
    let (name, rest) = split_first_word(rest)?;
    let rest = rest.trim_start();
    if !rest.starts_with('(') {
        return None;
    }
    let paren_end = find_matching_paren(rest)?;
    let args = parse_args(&rest[1..paren_end]);
    Some(KernelSignature { name: name.to_string(), args })
}

fn parse_args(args_str: &str) -> Vec<KernelArg> {
    if args_str.trim().is_empty() || args_str.trim() == "void" {
        return Vec::new();
    }
    args_str.split(',').enumerate().filter_map(|(i, arg)| parse_single_arg(arg.trim(), i)).collect()
}

/// Parse one parameter such as `__global const float* input`.
fn parse_single_arg(arg: &str, position: usize) -> Option<KernelArg> {
    let tokens: Vec<&str> = arg.split_whitespace().collect();
    let (qualifier, skip) = match tokens.first().copied()? {
        "__global" | "global" => (ArgQualifier::Global, 1),
        "__local" | "local" => (ArgQualifier::Local, 1),
        "__constant" | "constant" => (ArgQualifier::Constant, 1),
        "__private" | "private" => (ArgQualifier::Private, 1),
        _ => (ArgQualifier::Private, 0),
    };

    // `float*`, `float *`, `float * name` all reduce to type + name
    let joined = tokens[skip..].join(" ");
    let is_pointer = joined.contains('*');
    let cleaned = joined.replace('*', " ");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();

    let (type_name, name) = match parts.as_slice() {
        [] => return None,
        [only] => (only.to_string(), format!("arg{position}")),
        [ty @ .., name] => (ty.join(" "), name.to_string()),
    };
    Some(KernelArg { name, qualifier, type_name, is_pointer })
}

fn split_first_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let end = s.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((&s[..end], &s[end..]))
}

fn find_matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_block_comments(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("/*") {
        result.push_str(&rest[..start]);
        result.push(' ');
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    result.push_str(rest);
    result
}

fn strip_line_comments(s: &str) -> String {
    s.lines()
        .map(|line| if let Some(pos) = line.find("//") { &line[..pos] } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Problems found while validating kernel source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelValidationError {
    #[error("no __kernel functions found in source")]
    NoKernelsFound,

    #[error("unbalanced '{open}{close}' pair: {opened} opened, {closed} closed")]
    Unbalanced { open: char, close: char, opened: usize, closed: usize },

    #[error("duplicate kernel name: '{name}'")]
    DuplicateKernelName { name: String },
}

/// Validate kernel source and return its signatures.
pub fn validate_kernel_source(source: &str) -> Result<Vec<KernelSignature>, KernelValidationError> {
    let stripped = strip_line_comments(&strip_block_comments(source));
    for (open, close) in [('{', '}'), ('(', ')')] {
        check_balanced(&stripped, open, close)?;
    }

    let sigs = parse_kernel_signatures(source);
    if sigs.is_empty() {
        return Err(KernelValidationError::NoKernelsFound);
    }

    let mut seen = HashSet::new();
    for sig in &sigs {
        if !seen.insert(sig.name.as_str()) {
            return Err(KernelValidationError::DuplicateKernelName { name: sig.name.clone() });
        }
    }
    Ok(sigs)
}

fn check_balanced(s: &str, open: char, close: char) -> Result<(), KernelValidationError> {
    let (mut opened, mut closed, mut depth) = (0usize, 0usize, 0isize);
    for c in s.chars() {
        if c == open {
            opened += 1;
            depth += 1;
        } else if c == close {
            closed += 1;
            depth -= 1;
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 || opened != closed {
        return Err(KernelValidationError::Unbalanced { open, close, opened, closed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KERNEL: &str = "
        __kernel void vector_add(
            __global const float* a,
            __global const float* b,
            __global float* result,
            const int n
        ) {
            int gid = get_global_id(0);
            if (gid < n) {
                result[gid] = a[gid] + b[gid];
            }
        }
    ";

    const MULTI_KERNEL: &str = "
        __kernel void mat_mul(
            __global const float* A,
            __global const float* B,
            __global float* C,
            const int M
        ) {
        }

        kernel void relu_activate(global float* data, const int size) {
        }
    ";

    #[test]
    fn parse_single_kernel() {
        let sigs = parse_kernel_signatures(SAMPLE_KERNEL);
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].name, "vector_add");
        assert_eq!(sigs[0].args.len(), 4);
    }

    #[test]
    fn parse_kernel_arg_qualifiers() {
        let sigs = parse_kernel_signatures(SAMPLE_KERNEL);
        let args = &sigs[0].args;

        assert_eq!(args[0].qualifier, ArgQualifier::Global);
        assert_eq!(args[0].type_name, "const float");
        assert_eq!(args[0].base_type(), "float");
        assert!(args[0].is_pointer);
        assert_eq!(args[0].name, "a");

        assert_eq!(args[3].qualifier, ArgQualifier::Private);
        assert_eq!(args[3].base_type(), "int");
        assert_eq!(args[3].value_size(), Some(4));
        assert!(!args[3].is_pointer);
    }

    #[test]
    fn parse_multiple_kernels_with_bare_keyword() {
        let sigs = parse_kernel_signatures(MULTI_KERNEL);
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].name, "mat_mul");
        assert_eq!(sigs[1].name, "relu_activate");
        assert_eq!(sigs[1].args[0].qualifier, ArgQualifier::Global);
    }

    #[test]
    fn single_line_source_parses() {
        let src = "__kernel void multiplyMatrices(__global int* a,    __global int* b,    \
                   __global int* c,    const int M){    int colIndex = get_global_id(0);}";
        let sigs = parse_kernel_signatures(src);
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].args.len(), 4);
        assert_eq!(sigs[0].args[2].name, "c");
    }

    #[test]
    fn commented_out_kernel_is_ignored() {
        let src = "/* __kernel void hidden(__global int* x) {} */\n// kernel void gone(int y) {}\n";
        assert!(parse_kernel_signatures(src).is_empty());
    }

    #[test]
    fn identifier_containing_kernel_is_not_a_keyword() {
        let src = "void my_kernel_helper(int x) {}";
        assert!(parse_kernel_signatures(src).is_empty());
    }

    #[test]
    fn validate_rejects_empty_source() {
        assert_eq!(validate_kernel_source(""), Err(KernelValidationError::NoKernelsFound));
    }

    #[test]
    fn validate_rejects_unbalanced_braces() {
        let src = "__kernel void k(__global int* a) { a[0] = 1;";
        let err = validate_kernel_source(src).unwrap_err();
        assert!(matches!(err, KernelValidationError::Unbalanced { open: '{', .. }));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let src = "__kernel void k(int a) {} __kernel void k(int b) {}";
        assert_eq!(
            validate_kernel_source(src),
            Err(KernelValidationError::DuplicateKernelName { name: "k".into() })
        );
    }

    #[test]
    fn unknown_type_has_no_value_size() {
        let sigs = parse_kernel_signatures("__kernel void k(my_struct s) {}");
        assert_eq!(sigs[0].args[0].value_size(), None);
    }
}
