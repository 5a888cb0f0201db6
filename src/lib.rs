pub mod args;
pub mod capture;
pub mod config;
pub mod queue;
pub mod receiver;
pub mod sim;
#[cfg(feature = "uhd")]
pub mod uhd;
pub mod writer;

use num_complex::Complex;

/// One complex baseband sample (in-phase, quadrature)
pub type Sample = Complex<f32>;

/// On-disk size of one sample: two native-endian f32s, I then Q
pub const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

/// One receive call's worth of samples for a single channel, stored as
/// interleaved I,Q,I,Q,... floats. Blocks are the atomic unit of transfer
/// between the acquisition loop and a channel's writer - a block is never
/// split across queue operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    data: Vec<f32>,
}

impl SampleBlock {
    /// Build a block from interleaved IQ floats. Length must be even.
    pub fn from_interleaved(data: Vec<f32>) -> Self {
        assert!(data.len() % 2 == 0, "IQ data must be whole samples");
        Self { data }
    }

    pub fn num_samples(&self) -> usize {
        self.data.len() / 2
    }

    /// Interleaved float view, for raw writes
    pub fn floats(&self) -> &[f32] {
        &self.data
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.data
            .chunks_exact(2)
            .map(|iq| Complex::new(iq[0], iq[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sample_accounting() {
        let block = SampleBlock::from_interleaved(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(block.num_samples(), 2);
        let samps: Vec<_> = block.samples().collect();
        assert_eq!(samps, vec![Complex::new(1.0, 2.0), Complex::new(3.0, 4.0)]);
    }

    #[test]
    #[should_panic]
    fn block_rejects_half_samples() {
        SampleBlock::from_interleaved(vec![1.0, 2.0, 3.0]);
    }
}
