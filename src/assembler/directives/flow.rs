//! `.for`, `.repeat` and `.loop`: a loop saves the position after its header and `.loop`
//! jumps back to it.

use tracing::trace;

use super::expect_arguments;
use crate::assembler::{directive_name, Flow, Pass};
use crate::context::ForLoopState;
use crate::error::Error;
use crate::source::{FileId, Position};
use crate::symbols::{validate_name, LabelDef, LabelFlags};
use crate::text::{arguments, split_word};

/// Iterations after which a loop is considered runaway.
const MAX_ITERATIONS: usize = 1_000_000;

pub(crate) fn run(pass: &mut Pass, file: FileId, pos: Position, name: &str, rest: &str) -> Result<Flow, Error> {
	let resume = Position { line: pos.line, statement: pos.statement + 1 };
	match name {
		"for" => start_for(pass, file, resume, rest),
		"repeat" => start_repeat(pass, file, resume, rest),
		"loop" => next(pass, file),
		_ => {
			trace!("end of source");
			Ok(Flow::Stop)
		}
	}
}

fn set_counter(pass: &mut Pass, name: &str, value: f64) -> Result<(), Error> {
	let def = LabelDef {
		value,
		page: pass.ctx.pages.number(),
		location: pass.ctx.location,
		count: 1,
		flags: LabelFlags { constant: true, ..Default::default() },
		..Default::default()
	};
	pass.ctx.define_label(name, def, true)?;
	Ok(())
}

fn start_for(pass: &mut Pass, file: FileId, resume: Position, rest: &str) -> Result<Flow, Error> {
	let args = arguments(rest);
	expect_arguments("for", &args, 3, 4)?;
	let counter = args[0];
	validate_name(counter)?;
	let start = pass.ctx.eval(args[1])?;
	let end = pass.ctx.eval(args[2])?;
	let step = match args.get(3) {
		Some(step) => pass.ctx.eval(step)?,
		None if end < start => -1.0,
		None => 1.0,
	};
	if step == 0.0 {
		return Err(Error::directive(".for with a step of 0"));
	}
	set_counter(pass, counter, start)?;
	if (step > 0.0 && start > end) || (step < 0.0 && start < end) {
		pass.ctx.skipped_loops = 1;
		return Ok(Flow::Done);
	}
	pass.ctx.loops.push(ForLoopState {
		file,
		resume,
		counter: Some(counter.into()),
		value: start,
		end,
		step,
		remaining: None,
		iterations: 0,
	});
	Ok(Flow::Done)
}

fn start_repeat(pass: &mut Pass, file: FileId, resume: Position, rest: &str) -> Result<Flow, Error> {
	let args = arguments(rest);
	expect_arguments("repeat", &args, 1, 1)?;
	let count = pass.ctx.eval_int(args[0])?;
	if count <= 0 {
		pass.ctx.skipped_loops = 1;
		return Ok(Flow::Done);
	}
	pass.ctx.loops.push(ForLoopState {
		file,
		resume,
		counter: None,
		value: 0.0,
		end: 0.0,
		step: 0.0,
		remaining: Some(count as u64),
		iterations: 0,
	});
	Ok(Flow::Done)
}

fn next(pass: &mut Pass, file: FileId) -> Result<Flow, Error> {
	let Some(state) = pass.ctx.loops.last_mut() else {
		return Err(Error::directive(".loop without .for or .repeat"));
	};
	if state.file != file {
		pass.ctx.loops.pop();
		return Err(Error::directive(".loop must be in the file of its .for"));
	}
	state.iterations += 1;
	if state.iterations > MAX_ITERATIONS {
		pass.ctx.loops.pop();
		return Err(Error::directive(format!("loop stopped after {MAX_ITERATIONS} iterations")));
	}
	let resume = state.resume;
	if let Some(remaining) = state.remaining.as_mut() {
		if *remaining > 1 {
			*remaining -= 1;
			return Ok(Flow::Jump(resume));
		}
		pass.ctx.loops.pop();
		return Ok(Flow::Done);
	}
	state.value += state.step;
	let (value, counter) = (state.value, state.counter.clone());
	let again = (state.step > 0.0 && value <= state.end) || (state.step < 0.0 && value >= state.end);
	if !again {
		pass.ctx.loops.pop();
		return Ok(Flow::Done);
	}
	if let Some(counter) = counter {
		set_counter(pass, &counter, value)?;
	}
	Ok(Flow::Jump(resume))
}

/// Tracks nesting inside the body of a loop that runs zero times.
pub(crate) fn skip(pass: &mut Pass, text: &str) {
	let (word, rest) = split_word(text);
	let name = directive_name(word).or_else(|| directive_name(split_word(rest).0));
	match name.as_deref() {
		Some("for" | "repeat") => pass.ctx.skipped_loops += 1,
		Some("loop") => pass.ctx.skipped_loops -= 1,
		_ => {}
	}
}
