mod cli;
mod helper;
mod parallel;
mod proptests;
mod scenarios;
