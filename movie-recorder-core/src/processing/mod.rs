pub mod rosy;
