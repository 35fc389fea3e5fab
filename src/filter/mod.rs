//! FIR filter design and application.
//!
//! - [`design`]: Hamming-windowed sinc high-pass, low-pass, band-pass and
//!   notch kernels with MNE's automatic transition bandwidths and lengths.
//! - [`apply`]: overlap-add zero-phase convolution over all or selected rows.

pub mod apply;
pub mod design;

pub use apply::{apply_fir_rows, apply_fir_zero_phase, filter_1d, OverlapAdd};
pub use design::{
    auto_filter_length, auto_trans_bandwidth, auto_trans_bandwidth_low, design_bandpass,
    design_filter, design_highpass, design_lowpass, design_notch, firwin, gain_at, hamming,
};
