//! Per-block scratch memory for the RBF kernel.
//!
//! One contiguous allocation is carved into three regions:
//!
//! ```text
//! [ inner products: block_size^2 | sqr norms A1: block_size | sqr norms A2: block_size ]
//! ```
//!
//! When both operand blocks are the same rows (`is_equal_matrix`), the A2
//! region is not allocated and the A2 view aliases the A1 norms. The alias is
//! only ever handed out as `&[T]`, so it cannot be written through.

use crate::error::KernelError;

use super::float::KernelFloat;

/// Working memory owned by exactly one block computation.
#[derive(Debug)]
pub struct ScratchBuffer<T> {
    buf: Vec<T>,
    block_size: usize,
    is_equal_matrix: bool,
}

/// Borrowed views over a [`ScratchBuffer`], ready for the transform.
#[derive(Debug)]
pub struct ScratchViews<'a, T> {
    /// `block_size^2` inner products, overwritten with exponent arguments.
    pub inner_product: &'a mut [T],
    pub sqr_a1: &'a [T],
    /// Same memory as `sqr_a1` when the buffer was built for equal blocks.
    pub sqr_a2: &'a [T],
}

impl<T: KernelFloat> ScratchBuffer<T> {
    /// Allocate the scratch for one block computation.
    ///
    /// Either every region is valid or no buffer is returned.
    ///
    /// # Errors
    ///
    /// [`KernelError::SizeOverflow`] if the element count overflows `usize`,
    /// [`KernelError::Allocation`] if the allocator refuses the request.
    pub fn new(block_size: usize, is_equal_matrix: bool) -> Result<Self, KernelError> {
        let elements = Self::required_len(block_size, is_equal_matrix)
            .ok_or(KernelError::SizeOverflow { block_size })?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(elements)
            .map_err(|_| KernelError::Allocation { elements })?;
        buf.resize(elements, T::ZERO);

        Ok(Self {
            buf,
            block_size,
            is_equal_matrix,
        })
    }

    /// Element count `block_size^2 + (is_equal_matrix ? 1 : 2) * block_size`,
    /// or `None` on overflow.
    #[must_use]
    pub fn required_len(block_size: usize, is_equal_matrix: bool) -> Option<usize> {
        let norms = if is_equal_matrix {
            block_size
        } else {
            block_size.checked_mul(2)?
        };
        block_size.checked_mul(block_size)?.checked_add(norms)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_equal_matrix(&self) -> bool {
        self.is_equal_matrix
    }

    /// Total elements in the backing allocation.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn product_len(&self) -> usize {
        self.block_size * self.block_size
    }

    /// Writable norm regions. The second is `None` for equal blocks: there
    /// is only one norm vector to fill.
    pub fn norms_mut(&mut self) -> (&mut [T], Option<&mut [T]>) {
        let (bs, start) = (self.block_size, self.product_len());
        let norms = &mut self.buf[start..];
        if self.is_equal_matrix {
            (norms, None)
        } else {
            let (a1, a2) = norms.split_at_mut(bs);
            (a1, Some(a2))
        }
    }

    pub fn sqr_a1(&self) -> &[T] {
        let start = self.product_len();
        &self.buf[start..start + self.block_size]
    }

    pub fn sqr_a2(&self) -> &[T] {
        if self.is_equal_matrix {
            return self.sqr_a1();
        }
        let start = self.product_len() + self.block_size;
        &self.buf[start..start + self.block_size]
    }

    /// Split into the mutable product region and read-only norm views.
    pub fn views(&mut self) -> ScratchViews<'_, T> {
        let (bs, start) = (self.block_size, self.product_len());
        let (inner_product, norms) = self.buf.split_at_mut(start);
        let norms: &[T] = norms;
        let sqr_a1 = &norms[..bs];
        let sqr_a2 = if self.is_equal_matrix {
            sqr_a1
        } else {
            &norms[bs..2 * bs]
        };
        ScratchViews {
            inner_product,
            sqr_a1,
            sqr_a2,
        }
    }
}
