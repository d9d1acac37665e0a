//! OpenCL C kernel sources for the matrix and copy workloads.
//!
//! Each constant holds the full OpenCL C source for one kernel entry-point.
//! Matrices are square and row-major: `A[i][j] = a[i * M + j]`. Work item
//! `(get_global_id(0), get_global_id(1))` = `(col, row)` computes one element
//! of the result.

use std::fmt;

/// Entry point of the plain matrix kernels.
pub const MATMUL_ENTRY: &str = "multiplyMatrices";
/// Entry point of the kernels that take B already transposed.
pub const MATMUL_TRANS_ENTRY: &str = "multiplyMatricesTrans";
/// Entry point of the copy kernels.
pub const COPY_ENTRY: &str = "copyBuffer";

/// `C = A * B` over `int`.
pub const MATMUL_INT_SOURCE: &str = r#"
__kernel void multiplyMatrices(
    __global int* a,
    __global int* b,
    __global int* c,
    const int M)
{
    int colIndex = get_global_id(0);
    int rowIndex = get_global_id(1);
    int index = (rowIndex * M) + colIndex;
    int sum = 0;
    for (int k = 0; k < M; k++) {
        sum += a[rowIndex * M + k] * b[k * M + colIndex];
    }
    c[index] = sum;
}
"#;

/// `C = A * B` over `double`.
pub const MATMUL_DOUBLE_SOURCE: &str = r#"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
__kernel void multiplyMatrices(
    __global double* a,
    __global double* b,
    __global double* c,
    const int M)
{
    int colIndex = get_global_id(0);
    int rowIndex = get_global_id(1);
    int index = (rowIndex * M) + colIndex;
    double sum = 0;
    for (int k = 0; k < M; k++) {
        sum += a[rowIndex * M + k] * b[k * M + colIndex];
    }
    c[index] = sum;
}
"#;

/// `C = A * B` over `int`, with `b` holding Bᵀ so both reads walk a row.
pub const MATMUL_TRANS_INT_SOURCE: &str = r#"
__kernel void multiplyMatricesTrans(
    __global int* a,
    __global int* b,
    __global int* c,
    const int M)
{
    int colIndex = get_global_id(0);
    int rowIndex = get_global_id(1);
    int index = (rowIndex * M) + colIndex;
    int sum = 0;
    for (int k = 0; k < M; k++) {
        sum += a[rowIndex * M + k] * b[colIndex * M + k];
    }
    c[index] = sum;
}
"#;

/// `C = A * B` over `double`, with `b` holding Bᵀ.
pub const MATMUL_TRANS_DOUBLE_SOURCE: &str = r#"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
__kernel void multiplyMatricesTrans(
    __global double* a,
    __global double* b,
    __global double* c,
    const int M)
{
    int colIndex = get_global_id(0);
    int rowIndex = get_global_id(1);
    int index = (rowIndex * M) + colIndex;
    double sum = 0;
    for (int k = 0; k < M; k++) {
        sum += a[rowIndex * M + k] * b[colIndex * M + k];
    }
    c[index] = sum;
}
"#;

/// `dst[i] = src[i]` over `int`.
pub const COPY_INT_SOURCE: &str = r#"
__kernel void copyBuffer(
    __global const int* src,
    __global int* dst)
{
    int i = get_global_id(0);
    dst[i] = src[i];
}
"#;

/// `dst[i] = src[i]` over `double`.
pub const COPY_DOUBLE_SOURCE: &str = r#"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
__kernel void copyBuffer(
    __global const double* src,
    __global double* dst)
{
    int i = get_global_id(0);
    dst[i] = src[i];
}
"#;

/// Element type of the bundled kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElementType {
    #[default]
    Int,
    Double,
}

impl ElementType {
    /// OpenCL C spelling.
    pub fn cl_type(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Int => 4,
            Self::Double => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cl_type())
    }
}

/// How the second operand is laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatrixLayout {
    #[default]
    Plain,
    /// B is passed pre-transposed.
    Transposed,
}

impl MatrixLayout {
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Plain => MATMUL_ENTRY,
            Self::Transposed => MATMUL_TRANS_ENTRY,
        }
    }
}

/// Source of the matrix kernel for `element` and `layout`.
pub fn matmul_source(element: ElementType, layout: MatrixLayout) -> &'static str {
    match (element, layout) {
        (ElementType::Int, MatrixLayout::Plain) => MATMUL_INT_SOURCE,
        (ElementType::Int, MatrixLayout::Transposed) => MATMUL_TRANS_INT_SOURCE,
        (ElementType::Double, MatrixLayout::Plain) => MATMUL_DOUBLE_SOURCE,
        (ElementType::Double, MatrixLayout::Transposed) => MATMUL_TRANS_DOUBLE_SOURCE,
    }
}

pub fn copy_source(element: ElementType) -> &'static str {
    match element {
        ElementType::Int => COPY_INT_SOURCE,
        ElementType::Double => COPY_DOUBLE_SOURCE,
    }
}

/// Every bundled `(entry point, source)` pair.
pub fn all_kernel_sources() -> Vec<(&'static str, &'static str)> {
    let mut out = Vec::new();
    for element in [ElementType::Int, ElementType::Double] {
        for layout in [MatrixLayout::Plain, MatrixLayout::Transposed] {
            out.push((layout.entry_point(), matmul_source(element, layout)));
        }
        out.push((COPY_ENTRY, copy_source(element)));
    }
    out
}
