pub mod gibbs;
pub mod split_merge;
