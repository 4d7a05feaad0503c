mod cli_tests;
mod replay_tests;
