//! The individual build steps. Each step is a plain task function operating
//! on the layout's file sets; heavy lifting (Sass, bundling, image codecs)
//! is delegated to external transforms.

pub(crate) mod clear;
pub(crate) mod fingerprint;
pub(crate) mod images;
pub(crate) mod pages;
pub(crate) mod rewrite;
pub(crate) mod scripts;
pub(crate) mod styles;
