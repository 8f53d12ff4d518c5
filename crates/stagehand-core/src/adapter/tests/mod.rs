#[cfg(test)]
mod parsing_tests;
