pub mod support;

mod db_tests;
mod decoder_tests;
