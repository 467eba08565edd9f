//! Manual input for calibrations that cannot be read from the
//! file.
//!
//! Resolution falls back to asking a human when nothing else
//! works. The question is routed through a [`Prompt`] so that
//! tests and batch callers can answer it without a console.
use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
};

use anyhow::{bail, Result};

use crate::units::Unit;

pub trait Prompt {
    /// Ask `question` and block until an answer is available.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Reads answers from standard input.
#[derive(Debug, Default)]
pub struct Console;

impl Prompt for Console {
    fn ask(&mut self, question: &str) -> Result<String> {
        eprint!("{}", question);
        io::stderr().flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            bail!("no answer to {:?}: standard input is closed", question.trim());
        }
        Ok(line.trim().to_string())
    }
}

/// Answers from a fixed list, in order.
#[derive(Debug, Default, Clone)]
pub struct Scripted {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl Scripted {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scripted {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: vec![],
        }
    }

    /// Questions asked so far.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl Prompt for Scripted {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        match self.answers.pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("no scripted answer left for {:?}", question.trim()),
        }
    }
}

/// Ask until the answer parses as a positive number.
pub fn ask_number(prompt: &mut dyn Prompt, question: &str) -> Result<f64> {
    loop {
        let answer = prompt.ask(question)?;
        match answer.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0. => return Ok(v),
            Ok(_) => log::warn!("{:?} is not a positive size, please try again", answer),
            Err(_) => log::warn!("{:?} is not a number, please try again", answer),
        }
    }
}

/// Ask until the answer is a known length unit.
pub fn ask_unit(prompt: &mut dyn Prompt, question: &str) -> Result<Unit> {
    loop {
        let answer = prompt.ask(question)?;
        match Unit::parse(&answer) {
            Ok(unit) => return Ok(unit),
            Err(e) => log::warn!("{}, please try again", e),
        }
    }
}
