use clr_census::driver::{ClrDriver, DriverOptions, NullInnerStatePolicy, ObjectInfo};
use clr_census::runtime::{
    Address, ClrFlavor, RootKind, RuntimeProvider, SnapshotBuilder, SnapshotProvider, StackRoot,
    ThreadInfo, TypeHandle, Value,
};
use clr_census::utils::DriverError;
use pretty_assertions::assert_eq;

/// Core library types every fixture needs
struct Fixture {
    b: SnapshotBuilder,
    object: TypeHandle,
    delegate: TypeHandle,
    action: TypeHandle,
    task: TypeHandle,
}

impl Fixture {
    fn new(flavor: ClrFlavor) -> Self {
        let mut b = SnapshotBuilder::new(flavor);
        let object = b.add_type("System.Object", None);
        let delegate = b.add_type("System.Delegate", Some(object));
        let action = b.add_type("System.Action", Some(delegate));
        let task = b.add_type("System.Threading.Tasks.Task", Some(object));
        Self { b, object, delegate, action, task }
    }

    fn object_of(&mut self, type_name: &str) -> Address {
        let ty = self.b.add_type(type_name, Some(self.object));
        self.b.add_object(ty, 0)
    }

    fn delegate_to(&mut self, target: Option<Address>, type_name: &str, method: &str) -> Address {
        let code = self.b.add_method(type_name, method);
        let delegate = self.b.add_object(self.action, 0);
        self.b
            .set_field(delegate, "_target", target.map_or(Value::Null, Value::Ref))
            .set_field(delegate, "_methodPtr", Value::Int(code as i64))
            .set_field(delegate, "_methodPtrAux", Value::Null);
        delegate
    }

    fn task_with(&mut self, action: Option<Address>) -> Address {
        let task = self.b.add_object(self.task, 0);
        self.b
            .set_field(task, "m_action", action.map_or(Value::Null, Value::Ref))
            .set_field(task, "m_continuationObject", Value::Null)
            .set_field(task, "m_taskScheduler", Value::Null);
        task
    }

    fn array(&mut self, elements: Vec<Value>) -> Address {
        let ty = self.b.add_type("System.Object[]", Some(self.object));
        self.b.add_array(ty, elements)
    }
}

fn refs(addresses: &[Address]) -> Vec<Value> {
    addresses
        .iter()
        .map(|&a| if a == 0 { Value::Null } else { Value::Ref(a) })
        .collect()
}

fn names(driver: &ClrDriver, items: &[ObjectInfo]) -> Vec<Option<String>> {
    items
        .iter()
        .filter_map(|&oi| driver.task_info(oi).unwrap())
        .map(|t| t.method_name)
        .collect()
}

/// A .NET Core process with a task and a work item callback queued
fn core_queue_fixture() -> (SnapshotProvider, Address, Address) {
    let mut f = Fixture::new(ClrFlavor::Core);

    let worker = f.object_of("MyApp.Worker");
    let run = f.delegate_to(Some(worker), "MyApp.Worker", "Run");
    let task = f.task_with(Some(run));

    let closure = f.object_of("MyApp.Poller+<>c");
    let tick = f.delegate_to(Some(closure), "MyApp.Poller", "Tick");
    let quwi_type = f.b.add_type("System.Threading.QueueUserWorkItemCallback", Some(f.object));
    let quwi = f.b.add_object(quwi_type, 0);
    f.b.set_field(quwi, "_callback", Value::Ref(tick));

    let stale = f.object_of("MyApp.Stale");

    // one segment of four slots, items at positions 1 and 2
    let slot_type = f.b.add_type("Slot", None);
    let slots: Vec<Address> = (0..4).map(|_| f.b.add_object(slot_type, 0)).collect();
    f.b.set_field(slots[0], "Item", Value::Ref(stale))
        .set_field(slots[1], "Item", Value::Ref(task))
        .set_field(slots[2], "Item", Value::Ref(quwi))
        .set_field(slots[3], "Item", Value::Null);
    let slot_array = f.array(refs(&slots));

    let head_and_tail = f.object_of("PaddedHeadAndTail");
    f.b.set_field(head_and_tail, "Head", Value::Int(5))
        .set_field(head_and_tail, "Tail", Value::Int(7));

    let segment = f.object_of("ConcurrentQueueSegment");
    f.b.set_field(segment, "_slots", Value::Ref(slot_array))
        .set_field(segment, "_slotsMask", Value::Int(3))
        .set_field(segment, "_headAndTail", Value::Ref(head_and_tail))
        .set_field(segment, "_nextSegment", Value::Null);

    let queue = f.object_of("ConcurrentQueue");
    f.b.set_field(queue, "_head", Value::Ref(segment))
        .set_field(queue, "_tail", Value::Ref(segment));

    let work_queue = f.object_of("System.Threading.ThreadPoolWorkQueue");
    f.b.set_field(work_queue, "workItems", Value::Ref(queue));

    let globals = f.b.add_type("System.Threading.ThreadPoolGlobals", Some(f.object));
    f.b.set_static(globals, "workQueue", Value::Ref(work_queue));

    (f.b.build(), task, quwi)
}

#[test]
fn test_core_work_queue_items() {
    let (runtime, task, quwi) = core_queue_fixture();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();

    let items = driver.enumerate_managed_work_items().unwrap();
    let addresses: Vec<Address> = items.iter().map(|oi| oi.address).collect();
    assert_eq!(addresses, vec![task, quwi]);

    assert_eq!(
        names(&driver, &items),
        vec![
            Some("MyApp.Worker.Run".to_string()),
            Some("(MyApp.Poller+<>c)MyApp.Poller.Tick".to_string()),
        ]
    );
}

/// One modern queue segment of four slots holding `items` at positions
/// `head..tail`
fn core_segment(f: &mut Fixture, head: i64, items: &[Address]) -> Address {
    let slot_type = f.b.add_type("Slot", None);
    let slots: Vec<Address> = (0..4).map(|_| f.b.add_object(slot_type, 0)).collect();
    for (i, &item) in items.iter().enumerate() {
        let index = (head as usize + i) & 3;
        f.b.set_field(slots[index], "Item", Value::Ref(item));
    }
    let slot_array = f.array(refs(&slots));

    let head_and_tail = f.object_of("PaddedHeadAndTail");
    f.b.set_field(head_and_tail, "Head", Value::Int(head))
        .set_field(head_and_tail, "Tail", Value::Int(head + items.len() as i64));

    let segment = f.object_of("ConcurrentQueueSegment");
    f.b.set_field(segment, "_slots", Value::Ref(slot_array))
        .set_field(segment, "_slotsMask", Value::Int(3))
        .set_field(segment, "_headAndTail", Value::Ref(head_and_tail))
        .set_field(segment, "_nextSegment", Value::Null);
    segment
}

fn core_work_queue(f: &mut Fixture, head: Address, tail: Address) {
    let queue = f.object_of("ConcurrentQueue");
    f.b.set_field(queue, "_head", Value::Ref(head))
        .set_field(queue, "_tail", Value::Ref(tail));
    let work_queue = f.object_of("System.Threading.ThreadPoolWorkQueue");
    f.b.set_field(work_queue, "workItems", Value::Ref(queue));
    let globals = f.b.add_type("System.Threading.ThreadPoolGlobals", Some(f.object));
    f.b.set_static(globals, "workQueue", Value::Ref(work_queue));
}

#[test]
fn test_core_queue_walks_segments_up_to_tail() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let items: Vec<Address> = (0..6).map(|i| f.object_of(&format!("MyApp.Item{}", i))).collect();

    let first = core_segment(&mut f, 2, &items[0..2]);
    let middle = core_segment(&mut f, 0, &items[2..3]);
    // wraps around the slot buffer: positions 6 and 7 land in slots 2 and 3
    let tail = core_segment(&mut f, 6, &items[3..5]);
    // linked after the tail segment: enqueued after the walk started
    let late = core_segment(&mut f, 0, &items[5..6]);
    f.b.set_field(first, "_nextSegment", Value::Ref(middle))
        .set_field(middle, "_nextSegment", Value::Ref(tail))
        .set_field(tail, "_nextSegment", Value::Ref(late));
    core_work_queue(&mut f, first, tail);

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let found: Vec<Address> = driver
        .enumerate_managed_work_items()
        .unwrap()
        .iter()
        .map(|oi| oi.address)
        .collect();

    assert_eq!(found, items[0..5].to_vec());
}

#[test]
fn test_core_work_stealing_queues() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let local = f.object_of("MyApp.LocalItem");

    let wsq = f.object_of("WorkStealingQueue");
    let nodes = f.array(refs(&[0, local, 0]));
    f.b.set_field(wsq, "m_array", Value::Ref(nodes));
    let queues = f.array(refs(&[wsq, 0]));
    let list = f.b.add_type(
        "System.Threading.ThreadPoolWorkQueue+WorkStealingQueueList",
        Some(f.object),
    );
    f.b.set_static(list, "_queues", Value::Ref(queues));

    let work_queue = f.object_of("System.Threading.ThreadPoolWorkQueue");
    f.b.set_field(work_queue, "workItems", Value::Null);
    let globals = f.b.add_type("System.Threading.ThreadPoolGlobals", Some(f.object));
    f.b.set_static(globals, "workQueue", Value::Ref(work_queue));

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let items = driver.enumerate_managed_work_items().unwrap();

    assert_eq!(names(&driver, &items), vec![Some("MyApp.LocalItem".to_string())]);
}

#[test]
fn test_no_thread_pool_yields_nothing() {
    let f = Fixture::new(ClrFlavor::Core);
    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();

    assert!(driver.enumerate_managed_work_items().unwrap().is_empty());
    assert!(driver.enumerate_timer_tasks().unwrap().is_empty());
}

#[test]
fn test_core_timers() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let state = f.object_of("MyApp.Heartbeat");

    let second = f.object_of("System.Threading.TimerQueueTimer");
    f.b.set_field(second, "_state", Value::Null)
        .set_field(second, "_next", Value::Null);
    let first = f.object_of("System.Threading.TimerQueueTimer");
    f.b.set_field(first, "_state", Value::Ref(state))
        .set_field(first, "_next", Value::Ref(second));

    let queue = f.object_of("System.Threading.TimerQueue+Instance");
    f.b.set_field(queue, "_shortTimers", Value::Ref(first))
        .set_field(queue, "_longTimers", Value::Null);
    let instances = f.array(refs(&[queue]));
    let timer_queue = f.b.add_type("System.Threading.TimerQueue", Some(f.object));
    f.b.set_static(timer_queue, "<Instances>k__BackingField", Value::Ref(instances));

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let timers = driver.enumerate_timer_tasks().unwrap();

    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].address, state);
}

/// A .NET Framework process: two queued nodes, one thread-local node and
/// two timers whose states are delay wrappers
fn framework_fixture() -> (SnapshotProvider, Vec<Address>, Address, Address) {
    let mut f = Fixture::new(ClrFlavor::Desktop);

    let n1 = f.object_of("MyApp.First");
    let n2 = f.object_of("MyApp.Second");
    let ignored = f.object_of("MyApp.Consumed");
    let nodes = f.array(refs(&[n1, n2, ignored]));
    let segment = f.object_of("QueueSegment");
    f.b.set_field(segment, "indexes", Value::Int(2 << 16))
        .set_field(segment, "nodes", Value::Ref(nodes))
        .set_field(segment, "Next", Value::Null);

    let n3 = f.object_of("MyApp.ThreadLocal");
    let local_nodes = f.array(refs(&[n3, 0]));
    let wsq = f.object_of("WorkStealingQueue");
    f.b.set_field(wsq, "m_array", Value::Ref(local_nodes));
    let queues = f.array(refs(&[wsq, 0]));
    let sparse = f.object_of("SparseArray");
    f.b.set_field(sparse, "m_array", Value::Ref(queues));

    let queue_type = f.b.add_type("System.Threading.ThreadPoolWorkQueue", Some(f.object));
    f.b.set_static(queue_type, "allThreadQueues", Value::Ref(sparse));
    let work_queue = f.b.add_object(queue_type, 2);
    f.b.set_field(work_queue, "queueTail", Value::Ref(segment));
    let globals = f.b.add_type("System.Threading.ThreadPoolGlobals", Some(f.object));
    f.b.set_static(globals, "workQueue", Value::Ref(work_queue));

    // delay wrapper resuming a state machine
    let state_machine = f.object_of("MyApp.Service+<PollAsync>d__4");
    let runner = f.object_of("System.Runtime.CompilerServices.AsyncMethodBuilderCore+MoveNextRunner");
    f.b.set_field(runner, "m_stateMachine", Value::Ref(state_machine));
    let resume = f.delegate_to(
        Some(runner),
        "System.Runtime.CompilerServices.AsyncMethodBuilderCore+MoveNextRunner",
        "Run",
    );
    let delay_type = f.b.add_type("System.Threading.Tasks.Task+DelayPromise", Some(f.task));
    let delay = f.b.add_object(delay_type, 0);
    f.b.set_field(delay, "m_continuationObject", Value::Ref(resume));

    // delay wrapper nobody awaits
    let orphan = f.b.add_object(delay_type, 0);
    f.b.set_field(orphan, "m_continuationObject", Value::Null);

    let t2 = f.object_of("System.Threading.TimerQueueTimer");
    f.b.set_field(t2, "m_state", Value::Ref(orphan))
        .set_field(t2, "m_next", Value::Null);
    let t1 = f.object_of("System.Threading.TimerQueueTimer");
    f.b.set_field(t1, "m_state", Value::Ref(delay))
        .set_field(t1, "m_next", Value::Ref(t2));
    let timer_queue_type = f.b.add_type("System.Threading.TimerQueue", Some(f.object));
    let timer_queue = f.b.add_object(timer_queue_type, 2);
    f.b.set_field(timer_queue, "m_timers", Value::Ref(t1));
    f.b.set_static(timer_queue_type, "s_queue", Value::Ref(timer_queue));

    (f.b.build(), vec![n1, n2, n3], state_machine, orphan)
}

#[test]
fn test_framework_work_queue_items() {
    let (runtime, expected, _, _) = framework_fixture();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();

    let items = driver.enumerate_managed_work_items().unwrap();
    let addresses: Vec<Address> = items.iter().map(|oi| oi.address).collect();
    assert_eq!(addresses, expected);
}

#[test]
fn test_framework_queue_walks_every_segment_range() {
    let mut f = Fixture::new(ClrFlavor::Desktop);
    let first: Vec<Address> = (0..2).map(|i| f.object_of(&format!("MyApp.A{}", i))).collect();
    let second: Vec<Address> = (0..4).map(|i| f.object_of(&format!("MyApp.B{}", i))).collect();

    // second segment: slot 0 already consumed, slot 3 not yet published
    let tail_nodes = f.array(refs(&first));
    let next_nodes = f.array(refs(&second));
    let next = f.object_of("QueueSegment");
    f.b.set_field(next, "indexes", Value::Int(1 | (3 << 16)))
        .set_field(next, "nodes", Value::Ref(next_nodes))
        .set_field(next, "Next", Value::Null);
    let tail = f.object_of("QueueSegment");
    f.b.set_field(tail, "indexes", Value::Int(2 << 16))
        .set_field(tail, "nodes", Value::Ref(tail_nodes))
        .set_field(tail, "Next", Value::Ref(next));

    let queue_type = f.b.add_type("System.Threading.ThreadPoolWorkQueue", Some(f.object));
    let work_queue = f.b.add_object(queue_type, 2);
    f.b.set_field(work_queue, "queueTail", Value::Ref(tail));
    let globals = f.b.add_type("System.Threading.ThreadPoolGlobals", Some(f.object));
    f.b.set_static(globals, "workQueue", Value::Ref(work_queue));

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let found: Vec<Address> = driver
        .enumerate_managed_work_items()
        .unwrap()
        .iter()
        .map(|oi| oi.address)
        .collect();

    assert_eq!(found, vec![first[0], first[1], second[1], second[2]]);
}

#[test]
fn test_framework_timers_unwrap_delay_wrappers() {
    let (runtime, _, state_machine, orphan) = framework_fixture();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();

    let timers: Vec<Address> = driver
        .enumerate_timer_tasks()
        .unwrap()
        .iter()
        .map(|oi| oi.address)
        .collect();
    assert_eq!(timers, vec![state_machine, orphan]);
}

#[test]
fn test_framework_timers_skip_policy() {
    let (runtime, _, state_machine, _) = framework_fixture();
    let options = DriverOptions {
        null_inner_state: NullInnerStatePolicy::Skip,
    };
    let driver = ClrDriver::new(&runtime, options).unwrap();

    let timers: Vec<Address> = driver
        .enumerate_timer_tasks()
        .unwrap()
        .iter()
        .map(|oi| oi.address)
        .collect();
    assert_eq!(timers, vec![state_machine]);
}

#[test]
fn test_move_next_runner_resolves_to_state_machine() {
    let mut f = Fixture::new(ClrFlavor::Desktop);
    let state_machine = f.object_of("MyApp.Service+<LoadAsync>d__2");
    let runner = f.object_of("System.Runtime.CompilerServices.AsyncMethodBuilderCore+MoveNextRunner");
    f.b.set_field(runner, "m_stateMachine", Value::Ref(state_machine));
    let resume = f.delegate_to(
        Some(runner),
        "System.Runtime.CompilerServices.AsyncMethodBuilderCore+MoveNextRunner",
        "Run",
    );
    let task = f.task_with(Some(resume));
    let task_type = f.task;

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let info = driver
        .task_info(ObjectInfo { address: task, ty: task_type })
        .unwrap()
        .unwrap();

    assert_eq!(info.method_name.as_deref(), Some("MyApp.Service+<LoadAsync>d__2"));
}

#[test]
fn test_task_name_markers_and_scheduler() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let task_type = f.task;

    let untargeted = f.delegate_to(None, "MyApp.Jobs", "Run");
    let no_target = f.task_with(Some(untargeted));

    let no_action = f.task_with(None);

    let worker = f.object_of("MyApp.Worker");
    let run = f.delegate_to(Some(worker), "MyApp.Worker", "Run");
    let scheduled = f.task_with(Some(run));
    let scheduler = f.object_of("MyApp.LimitedScheduler");
    f.b.set_field(scheduled, "m_taskScheduler", Value::Ref(scheduler));

    let default_scheduled = f.task_with(Some(run));
    let pool = f.object_of("System.Threading.Tasks.ThreadPoolTaskScheduler");
    f.b.set_field(default_scheduled, "m_taskScheduler", Value::Ref(pool));

    let continued = f.task_with(None);
    f.b.set_field(continued, "m_continuationObject", Value::Ref(run));

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let name = |address| {
        driver
            .task_info(ObjectInfo { address, ty: task_type })
            .unwrap()
            .map(|t| t.method_name)
    };

    assert_eq!(name(no_target), Some(Some("[no target]".to_string())));
    assert_eq!(name(no_action), None);
    assert_eq!(
        name(scheduled),
        Some(Some("MyApp.Worker.Run [MyApp.LimitedScheduler]".to_string()))
    );
    assert_eq!(name(default_scheduled), Some(Some("MyApp.Worker.Run".to_string())));
    assert_eq!(name(continued), Some(Some("MyApp.Worker.Run".to_string())));
}

#[test]
fn test_unresolved_method_has_no_name() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let worker = f.object_of("MyApp.Worker");
    let delegate = f.b.add_object(f.action, 0);
    f.b.set_field(delegate, "_target", Value::Ref(worker))
        .set_field(delegate, "_methodPtr", Value::Int(0xdead))
        .set_field(delegate, "_methodPtrAux", Value::Null);
    let task = f.task_with(Some(delegate));
    let task_type = f.task;

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    let info = driver
        .task_info(ObjectInfo { address: task, ty: task_type })
        .unwrap()
        .unwrap();

    assert_eq!(info.method_name, None);
}

#[test]
fn test_type_classification() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let generic_task = f.b.add_type("System.Threading.Tasks.Task<System.Int32>", Some(f.task));
    let derived = f.b.add_type("MyApp.CustomTask", Some(generic_task));
    let worker = f.b.add_type("MyApp.Worker", Some(f.object));
    let (object, delegate, action, task) = (f.object, f.delegate, f.action, f.task);

    let runtime = f.b.build();
    let mut driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();

    assert!(driver.is_task_descendant(task));
    assert!(driver.is_task_descendant(derived));
    assert!(driver.is_task_descendant(derived));
    assert!(!driver.is_task_descendant(worker));
    assert!(!driver.is_task_descendant(object));

    assert!(driver.is_delegate_descendant(action));
    assert!(driver.is_delegate_descendant(delegate));
    assert!(!driver.is_delegate_descendant(worker));
}

#[test]
fn test_stack_tasks_are_deduplicated_locals() {
    let mut f = Fixture::new(ClrFlavor::Core);
    let task = f.task_with(None);
    let pinned = f.task_with(None);
    let worker = f.object_of("MyApp.Worker");

    let root = |object, kind| StackRoot { object, kind };
    f.b.add_thread(ThreadInfo {
        managed_id: 1,
        os_id: 100,
        frames: Vec::new(),
        roots: vec![
            root(task, RootKind::LocalVar),
            root(worker, RootKind::LocalVar),
            root(pinned, RootKind::Pinning),
        ],
    })
    .add_thread(ThreadInfo {
        managed_id: 2,
        os_id: 101,
        frames: Vec::new(),
        roots: vec![root(task, RootKind::LocalVar)],
    });

    let runtime = f.b.build();
    let driver = ClrDriver::new(&runtime, DriverOptions::default()).unwrap();
    assert_eq!(driver.enumerate_stack_tasks(), vec![task]);
}

#[test]
fn test_driver_requires_corelib() {
    let f = Fixture::new(ClrFlavor::Core);
    let mut snapshot = f.b.into_snapshot();
    snapshot.modules.clear();
    let runtime = SnapshotProvider::new(snapshot).unwrap();

    assert!(matches!(
        ClrDriver::new(&runtime, DriverOptions::default()),
        Err(DriverError::MissingCorlib)
    ));
}

#[test]
fn test_driver_requires_well_known_types() {
    let runtime = SnapshotBuilder::new(ClrFlavor::Desktop).build();
    assert!(matches!(
        ClrDriver::new(&runtime, DriverOptions::default()),
        Err(DriverError::MissingType("System.Object"))
    ));
    assert_eq!(runtime.flavor(), ClrFlavor::Desktop);
}
