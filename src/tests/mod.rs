pub mod support;

mod cards;
