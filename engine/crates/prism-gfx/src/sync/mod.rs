pub mod fence;
