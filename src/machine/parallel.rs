use crate::machine::code_repo::QUERY_SUCCESS;
use crate::machine::dispatch::RunOutcome;
use crate::machine::lib_machine::{LeafAnswer, Term};
use crate::machine::machine_indices::*;
use crate::machine::machine_state::MachineState;
use crate::machine::stack::*;
use crate::machine::Machine;
use crate::parser::ast::*;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/*
 * OR-parallel search over a tree of public nodes. A busy worker that
 * sees an idle one publishes its oldest shareable choice point: a
 * snapshot of its machine state as of that choice point and the clause
 * alternatives it had left. It then marks its own copy Shared and never
 * tries them itself. Idle workers claim single alternatives under the
 * tree lock, so each alternative runs exactly once.
 *
 * Answers travel over a bounded channel, so workers run at most a few
 * answers ahead of the consumer.
 *
 * Exhausted nodes are retired rather than dropped. Each carries a count
 * of workers copying its snapshot, and once `delayed_release_load` nodes
 * are retired a sweep releases those nobody is reading.
 */

/// A choice point handed over to the shared tree.
pub(crate) struct PublicNode {
    snapshot: MachineState,
    b: usize,
    alternatives: Vec<CodePtr>,
    readers: AtomicUsize,
}

impl fmt::Debug for PublicNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicNode")
            .field("b", &self.b)
            .field("alternatives", &self.alternatives.len())
            .field("readers", &self.readers.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug)]
struct OpenNode {
    node: Arc<PublicNode>,
    next: usize,
}

#[derive(Debug, Default)]
struct TreeState {
    open: VecDeque<OpenNode>,
    retired: Vec<Arc<PublicNode>>,
    idle: usize,
    done: bool,
    halted: Option<i32>,
    published: usize,
}

/// The state every worker of a parallel run shares.
#[derive(Debug)]
pub(crate) struct SharedTree {
    pub(crate) stop: AtomicBool,
    idle: AtomicUsize,
    state: Mutex<TreeState>,
    work: Condvar,
    workers: usize,
    delayed_release_load: usize,
}

// an alternative claimed by an idle worker.
struct Task {
    node: Arc<PublicNode>,
    alternative: CodePtr,
}

impl SharedTree {
    fn new(workers: usize, delayed_release_load: usize) -> Self {
        SharedTree {
            stop: AtomicBool::new(false),
            idle: AtomicUsize::new(0),
            state: Mutex::new(TreeState::default()),
            work: Condvar::new(),
            workers,
            delayed_release_load,
        }
    }

    #[inline]
    fn has_idle_workers(&self) -> bool {
        self.idle.load(Ordering::Relaxed) > 0
    }

    fn publish(&self, node: PublicNode) {
        let mut state = self.state.lock();

        state.published += 1;
        state.open.push_back(OpenNode {
            node: Arc::new(node),
            next: 0,
        });

        self.work.notify_all();
    }

    fn stop_all(&self, halted: Option<i32>) {
        let mut state = self.state.lock();

        if state.halted.is_none() {
            state.halted = halted;
        }

        self.stop.store(true, Ordering::Relaxed);
        self.work.notify_all();
    }

    /// Waits for an alternative to run. Gives `None` once the run is
    /// stopped or every worker is idle with nothing left to claim.
    fn claim(&self) -> Option<Task> {
        let mut state = self.state.lock();

        state.idle += 1;
        self.idle.store(state.idle, Ordering::Relaxed);

        loop {
            if self.stop.load(Ordering::Relaxed) || state.done {
                return None;
            }

            if let Some(task) = self.take_alternative(&mut state) {
                state.idle -= 1;
                self.idle.store(state.idle, Ordering::Relaxed);
                return Some(task);
            }

            if state.idle == self.workers {
                state.done = true;
                self.work.notify_all();
                return None;
            }

            self.work.wait(&mut state);
        }
    }

    fn take_alternative(&self, state: &mut TreeState) -> Option<Task> {
        let open = state.open.front_mut()?;
        let node = open.node.clone();
        let alternative = node.alternatives[open.next];

        open.next += 1;
        node.readers.fetch_add(1, Ordering::AcqRel);

        if open.next == node.alternatives.len() {
            state.open.pop_front();
            state.retired.push(node.clone());

            if state.retired.len() >= self.delayed_release_load {
                self.sweep(state);
            }
        }

        Some(Task { node, alternative })
    }

    fn sweep(&self, state: &mut TreeState) {
        let before = state.retired.len();

        state
            .retired
            .retain(|node| node.readers.load(Ordering::Acquire) > 0);

        tracing::trace!(
            released = before - state.retired.len(),
            kept = state.retired.len(),
            "swept retired nodes"
        );
    }
}

/// A worker's handle on the tree of its run.
#[derive(Debug, Clone)]
pub(crate) struct WorkerLink {
    pub(crate) tree: Arc<SharedTree>,
    pub(crate) id: usize,
}

// the lowest choice point a cut pending in the environment chain from
// `e` may remove.
fn cut_reach(machine_st: &MachineState, mut e: usize) -> usize {
    let mut reach = usize::MAX;

    while e != 0 && e < machine_st.stack.and_len() {
        let frame = machine_st.stack.and_frame(e);

        if let Some(cut_b0) = frame.cut_b0 {
            reach = reach.min(cut_b0);
        }

        e = frame.e;
    }

    reach
}

impl Machine {
    /// Points the machine at the query compiled at `entry`.
    pub(crate) fn enter_query(&mut self, entry: CodePtr, args: &[Addr]) {
        let machine_st = &mut self.machine_st;

        for (i, arg) in args.iter().enumerate() {
            machine_st.registers[i + 1] = arg.clone();
        }

        machine_st.num_of_args = args.len();
        machine_st.cp = CodePtr::Dir(QUERY_SUCCESS);
        machine_st.b0 = machine_st.b();
        machine_st.p = entry;
    }

    // the oldest own choice point with clause alternatives that no
    // pending cut can remove and that no barrier or catch frame
    // encloses.
    fn shareable_choice_point(&self) -> Option<usize> {
        let machine_st = &self.machine_st;
        let frames = machine_st.stack.or_frames();

        let blocked = frames
            .iter()
            .position(|frame| matches!(frame.alt, Alternative::Barrier | Alternative::Catch))
            .unwrap_or(frames.len());

        let mut reach = cut_reach(machine_st, machine_st.e);
        let mut oldest = None;

        for b in (machine_st.foreign_len..frames.len()).rev() {
            let frame = &frames[b];

            reach = reach.min(cut_reach(machine_st, frame.e));

            if frame.foreign || b >= blocked || reach <= b {
                continue;
            }

            if let Alternative::Clauses { next, end, cuts: false, .. } = frame.alt {
                if next < end {
                    oldest = Some(b);
                }
            }
        }

        oldest
    }

    /// Publishes a choice point if another worker is waiting for work.
    pub(crate) fn share_work(&mut self) {
        let link = match &self.worker {
            Some(link) if link.tree.has_idle_workers() => link.clone(),
            _ => return,
        };

        let b = match self.shareable_choice_point() {
            Some(b) => b,
            None => return,
        };

        let alternatives = match &self.machine_st.stack.or_frame(b).alt {
            Alternative::Clauses { clauses, next, end, .. } => clauses[*next..*end].to_vec(),
            _ => return,
        };

        let mut snapshot = MachineState {
            stack: self.machine_st.stack.snapshot(b),
            ..self.machine_st.clone()
        };

        snapshot.restore_choice_point(b);
        snapshot.fail = false;

        self.machine_st.stack.or_frame_mut(b).alt = Alternative::Shared;

        tracing::debug!(
            worker = link.id,
            b,
            alternatives = alternatives.len(),
            "sharing choice point"
        );

        link.tree.publish(PublicNode {
            snapshot,
            b,
            alternatives,
            readers: AtomicUsize::new(0),
        });
    }

    fn install_task(&mut self, task: Task) {
        let b = task.node.b;

        self.machine_st = task.node.snapshot.clone();
        task.node.readers.fetch_sub(1, Ordering::AcqRel);

        let machine_st = &mut self.machine_st;

        machine_st.stack.mark_foreign(b + 1);
        machine_st.stack.or_frame_mut(b).alt = Alternative::Shared;
        machine_st.foreign_len = b + 1;
        machine_st.p = task.alternative;
    }

    // runs the current task to exhaustion, then claims more. A closed
    // answer channel stops the run.
    fn run_worker(mut self, query_vars: Vec<(String, usize)>, answers: Sender<Result<LeafAnswer, Term>>, busy: bool) {
        let tree = match &self.worker {
            Some(link) => link.tree.clone(),
            None => return,
        };

        let mut busy = busy;

        loop {
            if !busy {
                match tree.claim() {
                    Some(task) => self.install_task(task),
                    None => return,
                }
            }

            busy = false;

            loop {
                match self.dispatch_loop() {
                    RunOutcome::Success => {
                        if answers.send(Ok(self.leaf_answer(&query_vars))).is_err() {
                            tree.stop_all(None);
                            return;
                        }

                        self.machine_st.fail = true;
                    }
                    RunOutcome::Exhausted => break,
                    RunOutcome::Exception(ball) => {
                        if answers.send(Machine::exception_answer(&ball)).is_err() {
                            tracing::debug!(worker = ?self.worker.as_ref().map(|link| link.id), "exception after the query was dropped");
                        }

                        tree.stop_all(None);
                        return;
                    }
                    RunOutcome::Halt => {
                        tree.stop_all(self.halted);
                        return;
                    }
                }
            }
        }
    }

    /// Starts the query compiled at `entry` on `config.workers` threads.
    /// The workers run until their answers are taken, the search is
    /// exhausted or the run is stopped.
    pub(crate) fn start_parallel(
        &self,
        entry: CodePtr,
        args: &[Addr],
        query_vars: &[(String, usize)],
    ) -> ParallelRun {
        let workers = self.config.workers.max(1);
        let tree = Arc::new(SharedTree::new(workers, self.config.delayed_release_load));
        let (sender, receiver) = crossbeam_channel::bounded(workers);

        tracing::debug!(workers, "starting parallel query");

        let handles = (0..workers)
            .map(|id| {
                let mut worker = self.clone();
                let sender = sender.clone();
                let query_vars = query_vars.to_vec();

                worker.worker = Some(WorkerLink { tree: tree.clone(), id });
                worker.cycles = 0;

                if id == 0 {
                    worker.enter_query(entry, args);
                }

                thread::spawn(move || worker.run_worker(query_vars, sender, id == 0))
            })
            .collect();

        ParallelRun {
            tree,
            answers: Some(receiver),
            handles,
        }
    }
}

/// The workers of a parallel query and the channel their answers
/// arrive on.
pub(crate) struct ParallelRun {
    tree: Arc<SharedTree>,
    answers: Option<Receiver<Result<LeafAnswer, Term>>>,
    handles: Vec<JoinHandle<()>>,
}

impl ParallelRun {
    /// Waits for the next answer. Once every worker has finished the
    /// search ends with `false`, unless it was stopped.
    pub(crate) fn next_answer(&mut self, machine: &mut Machine) -> Option<Result<LeafAnswer, Term>> {
        let answer = self.answers.as_ref()?.recv();

        match answer {
            Ok(answer) => Some(answer),
            Err(_) => {
                self.join(machine);

                if machine.halted.is_none() && !self.tree.stop.load(Ordering::Relaxed) {
                    Some(Ok(LeafAnswer::False))
                } else {
                    None
                }
            }
        }
    }

    /// Stops every worker and waits for them to finish.
    pub(crate) fn stop(&mut self, machine: &mut Machine) {
        if !self.handles.is_empty() {
            self.tree.stop_all(None);
        }

        self.join(machine);
    }

    fn join(&mut self, machine: &mut Machine) {
        // blocked senders fail once the receiver is gone.
        self.answers = None;

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("parallel worker panicked");
            }
        }

        let state = self.tree.state.lock();

        tracing::debug!(published = state.published, "parallel query finished");

        if let Some(code) = state.halted {
            machine.halted = Some(code);
        }
    }
}

impl Drop for ParallelRun {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.tree.stop_all(None);
        self.answers = None;

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("parallel worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::config::MachineBuilder;

    use std::collections::BTreeSet;

    fn machine(workers: usize) -> Machine {
        MachineBuilder::new()
            .with_workers(workers)
            .with_scheduler_loop(1)
            .build()
            .unwrap()
    }

    fn solutions(machine: &mut Machine, query: &str) -> BTreeSet<String> {
        machine
            .run_query(query)
            .filter_map(|answer| match answer {
                Ok(LeafAnswer::LeafAnswer { bindings }) => Some(format!("{:?}", bindings)),
                Ok(LeafAnswer::True) => Some("true".to_string()),
                _ => None,
            })
            .collect()
    }

    const PROGRAM: &str = r#"
        digit(0). digit(1). digit(2). digit(3). digit(4).
        pair(X, Y) :- digit(X), digit(Y).
        first(X) :- digit(X), !.
    "#;

    #[test]
    fn parallel_runs_find_every_solution() {
        let mut sequential = machine(1);
        let mut parallel = machine(4);

        sequential.consult_module_string("m", PROGRAM).unwrap();
        parallel.consult_module_string("m", PROGRAM).unwrap();

        let expected = solutions(&mut sequential, "pair(X, Y).");

        assert_eq!(expected.len(), 25);
        assert_eq!(solutions(&mut parallel, "pair(X, Y)."), expected);
    }

    #[test]
    fn cut_is_respected_across_workers() {
        let mut parallel = machine(3);
        parallel.consult_module_string("m", PROGRAM).unwrap();

        assert_eq!(solutions(&mut parallel, "first(X)."), BTreeSet::from(["{\"X\": Integer(0)}".to_string()]));
        assert_eq!(solutions(&mut parallel, "digit(X), !.").len(), 1);
    }

    #[test]
    fn failure_ends_with_false() {
        let mut parallel = machine(2);
        parallel.consult_module_string("m", PROGRAM).unwrap();

        let answers: Vec<_> = parallel.run_query("digit(9).").collect();
        assert_eq!(answers, [Ok(LeafAnswer::False)]);
    }

    #[test]
    fn ground_queries_stop_at_the_first_answer() {
        let mut parallel = machine(2);
        parallel.consult_module_string("m", PROGRAM).unwrap();

        let answers: Vec<_> = parallel.run_query("member(a, [a, b, a]).").collect();
        assert_eq!(answers, [Ok(LeafAnswer::True)]);
    }

    #[test]
    fn exceptions_stop_the_run() {
        let mut parallel = machine(2);
        parallel.consult_module_string("m", PROGRAM).unwrap();

        let answers: Vec<_> = parallel.run_query("digit(X), X > 2, throw(found(X)).").collect();

        assert!(answers
            .iter()
            .any(|answer| matches!(answer, Ok(LeafAnswer::Exception(Term::Compound(name, _))) if name == "found")));
        assert!(!answers.contains(&Ok(LeafAnswer::False)));
    }

    #[test]
    fn answers_stream_from_infinite_generators() {
        let mut parallel = machine(2);
        parallel.consult_module_string("m", PROGRAM).unwrap();
        parallel
            .consult_module_string("nat", "nat(0).\nnat(N) :- nat(M), N is M + 1.\n")
            .unwrap();

        let answers: Vec<_> = parallel.run_query("nat(X).").take(3).collect();

        assert_eq!(answers.len(), 3);
        assert!(answers
            .iter()
            .all(|answer| matches!(answer, Ok(LeafAnswer::LeafAnswer { .. }))));

        // the dropped query stopped its workers; the machine is usable.
        let answers: Vec<_> = parallel.run_query("digit(9).").collect();
        assert_eq!(answers, [Ok(LeafAnswer::False)]);
    }

    #[test]
    fn closing_the_answer_channel_stops_the_workers() {
        let mut parallel = machine(2);
        parallel
            .consult_module_string("nat", "nat(0).\nnat(N) :- nat(M), N is M + 1.\n")
            .unwrap();

        let goal = crate::parser::ast::Term::Clause(atom!("nat"), vec![crate::parser::ast::Term::Var("X".to_string())]);
        let entry = parallel.compile_local(goal, &["X".to_string()]).unwrap();
        let x = parallel.machine_st.heap.push_var().unwrap();
        let h = x.as_var().unwrap();

        let mut run = parallel.start_parallel(entry, &[x], &[("X".to_string(), h)]);

        assert!(matches!(run.next_answer(&mut parallel), Some(Ok(LeafAnswer::LeafAnswer { .. }))));

        // no stop request: the workers end on their own once a send fails.
        run.join(&mut parallel);

        assert!(run.tree.stop.load(Ordering::Relaxed));
        assert!(parallel.halted().is_none());
    }

    #[test]
    fn halting_workers_halt_the_machine() {
        let mut parallel = machine(2);
        parallel.consult_module_string("m", PROGRAM).unwrap();

        let answers: Vec<_> = parallel.run_query("digit(X), X > 3, halt(4).").collect();

        assert!(answers.is_empty());
        assert_eq!(parallel.halted(), Some(4));
    }

    #[test]
    fn retired_nodes_are_released_without_readers() {
        let tree = SharedTree::new(1, 2);
        let machine = machine(1);

        for _ in 0..3 {
            tree.publish(PublicNode {
                snapshot: machine.machine_st.clone(),
                b: 0,
                alternatives: vec![CodePtr::Dir(QUERY_SUCCESS)],
                readers: AtomicUsize::new(0),
            });
        }

        let held = tree.claim().unwrap();
        let released = tree.claim().unwrap();

        released.node.readers.fetch_sub(1, Ordering::AcqRel);
        drop(released);

        // the second retirement triggers a sweep; the first node is
        // still being read.
        assert_eq!(tree.state.lock().retired.len(), 2);

        held.node.readers.fetch_sub(1, Ordering::AcqRel);
        let _third = tree.claim().unwrap();

        assert_eq!(tree.state.lock().retired.len(), 1);
    }
}
