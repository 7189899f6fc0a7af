//! Row-major tensor type backing the model's forward and backward math.

use serde::{Deserialize, Serialize};

use crate::rng::LcgRng;

/// A multi-dimensional array of `f32` values in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// The shape of the tensor (dimensions)
    shape: Vec<usize>,
    /// The underlying data in row-major order
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor of the given shape filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// Creates a tensor of the given shape filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![1.0; numel],
        }
    }

    /// Creates a tensor from existing data.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the shape.
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            numel
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Creates a tensor with samples from N(mean, std²) drawn from `rng`.
    pub fn randn(shape: &[usize], mean: f32, std: f32, rng: &mut LcgRng) -> Self {
        let numel: usize = shape.iter().product();
        let data: Vec<f32> = (0..numel).map(|_| rng.normal(mean, std)).collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Creates a tensor with samples from U[lo, hi) drawn from `rng`.
    pub fn rand_uniform(shape: &[usize], lo: f32, hi: f32, rng: &mut LcgRng) -> Self {
        let numel: usize = shape.iter().product();
        let data: Vec<f32> = (0..numel).map(|_| rng.uniform(lo, hi)).collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns a reference to the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Matrix multiplication between two 2D tensors.
    ///
    /// # Panics
    ///
    /// Panics if either tensor is not 2D or the inner dimensions don't match.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(
            self.shape[1], other.shape[0],
            "Inner dimensions must match for matmul"
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                if a == 0.0 {
                    continue;
                }
                let row = &other.data[l * n..(l + 1) * n];
                let out = &mut result[i * n..(i + 1) * n];
                for j in 0..n {
                    out[j] += a * row[j];
                }
            }
        }

        Tensor::from_data(&[m, n], result)
    }

    /// Transposes a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = self.data[i * n + j];
            }
        }

        Tensor::from_data(&[n, m], result)
    }

    /// Element-wise addition, broadcasting a 1D bias along the rows of a 2D tensor.
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let data: Vec<f32> = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a + b)
                .collect();
            Tensor::from_data(&self.shape, data)
        } else if self.ndim() == 2 && other.ndim() == 1 && self.shape[1] == other.shape[0] {
            let mut data = self.data.clone();
            let n = self.shape[1];
            for i in 0..self.shape[0] {
                for j in 0..n {
                    data[i * n + j] += other.data[j];
                }
            }
            Tensor::from_data(&self.shape, data)
        } else {
            panic!(
                "Cannot broadcast shapes {:?} and {:?}",
                self.shape, other.shape
            );
        }
    }

    /// Element-wise multiplication of same-shaped tensors.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "mul requires identical shapes, got {:?} and {:?}",
            self.shape, other.shape
        );
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data.iter().map(|a| a * scalar).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Element-wise square.
    pub fn sqr(&self) -> Tensor {
        self.map(|x| x * x)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sum along an axis of a 2D tensor; axis 0 collapses rows, axis 1 columns.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "sum_axis only implemented for 2D tensors");
        assert!(axis < 2, "Axis out of bounds");
        let n = self.shape[1];

        if axis == 0 {
            let mut result = vec![0.0; n];
            for i in 0..self.shape[0] {
                for j in 0..n {
                    result[j] += self.data[i * n + j];
                }
            }
            Tensor::from_data(&[n], result)
        } else {
            let result: Vec<f32> = (0..self.shape[0])
                .map(|i| self.data[i * n..(i + 1) * n].iter().sum())
                .collect();
            Tensor::from_data(&[self.shape[0]], result)
        }
    }

    /// Applies a function element-wise.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let data: Vec<f32> = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Reshapes the tensor.
    ///
    /// # Panics
    ///
    /// Panics if the new shape has a different number of elements.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "Cannot reshape tensor of {} elements to shape {:?}",
            self.numel(),
            new_shape
        );
        Tensor::from_data(new_shape, self.data.clone())
    }

    /// Concatenates 2D tensors along axis 1 (columns).
    ///
    /// # Panics
    ///
    /// Panics if the parts disagree on row count or the list is empty.
    pub fn concat_cols(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols requires at least one tensor");
        let rows = parts[0].shape[0];
        let total: usize = parts
            .iter()
            .map(|t| {
                assert_eq!(t.ndim(), 2, "concat_cols requires 2D tensors");
                assert_eq!(t.shape[0], rows, "concat_cols requires equal row counts");
                t.shape[1]
            })
            .sum();

        let mut data = vec![0.0; rows * total];
        for r in 0..rows {
            let mut offset = r * total;
            for t in parts {
                let w = t.shape[1];
                data[offset..offset + w].copy_from_slice(&t.data[r * w..(r + 1) * w]);
                offset += w;
            }
        }
        Tensor::from_data(&[rows, total], data)
    }

    /// Splits a 2D tensor along axis 1 into slices of the given widths.
    ///
    /// # Panics
    ///
    /// Panics if the widths don't sum to the column count.
    pub fn split_cols(&self, widths: &[usize]) -> Vec<Tensor> {
        assert_eq!(self.ndim(), 2, "split_cols requires a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        assert_eq!(
            widths.iter().sum::<usize>(),
            cols,
            "split widths {:?} don't sum to column count {}",
            widths,
            cols
        );

        let mut out = Vec::with_capacity(widths.len());
        let mut start = 0;
        for &w in widths {
            let mut data = vec![0.0; rows * w];
            for r in 0..rows {
                data[r * w..(r + 1) * w]
                    .copy_from_slice(&self.data[r * cols + start..r * cols + start + w]);
            }
            out.push(Tensor::from_data(&[rows, w], data));
            start += w;
        }
        out
    }
}
