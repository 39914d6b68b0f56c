use canopy_prolog::*;

use std::collections::BTreeSet;

pub fn machine_with(program: &str) -> Machine {
    builder_with(MachineBuilder::new(), program)
}

pub fn builder_with(builder: MachineBuilder, program: &str) -> Machine {
    let mut machine = builder.build().unwrap();
    machine.consult_module_string("test", program).unwrap();
    machine
}

/// The answers of `query` that bind variables or succeed outright.
pub fn solutions(machine: &mut Machine, query: &str) -> Vec<LeafAnswer> {
    machine
        .run_query(query)
        .filter_map(|answer| match answer {
            Ok(answer @ (LeafAnswer::True | LeafAnswer::LeafAnswer { .. })) => Some(answer),
            _ => None,
        })
        .collect()
}

/// The solutions of `query`, printed, as a set.
pub fn solution_set(machine: &mut Machine, query: &str) -> BTreeSet<String> {
    solutions(machine, query)
        .into_iter()
        .map(|answer| format!("{:?}", answer))
        .collect()
}

/// The formal part of the error `query` throws.
pub fn error_of(machine: &mut Machine, query: &str) -> Term {
    for answer in machine.run_query(query) {
        match answer {
            Err(Term::Compound(name, mut args)) if name == "error" => return args.swap_remove(0),
            _ => {}
        }
    }

    panic!("{} raised no error", query)
}
