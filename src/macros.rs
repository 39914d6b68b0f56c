/* functor! builds error terms and other small terms as stubs, ready
 * to be thrown or written to the heap. Arguments are given as
 * atom(..), fixnum(..), constant(..), stub(..) or var().
 */
macro_rules! functor {
    ($name:expr) => ({
        $crate::machine::machine_errors::functor_stub($name, vec![])
    });
    ($name:expr, [$($dt:ident($($value:expr),*)),+]) => ({
        $crate::machine::machine_errors::functor_stub(
            $name,
            vec![$(functor_element!($dt($($value),*))),+],
        )
    });
}

macro_rules! functor_element {
    (atom($e:expr)) => {
        $crate::machine::machine_errors::FunctorElement::Atom($e)
    };
    (fixnum($e:expr)) => {
        $crate::machine::machine_errors::FunctorElement::Fixnum($e as i64)
    };
    (constant($e:expr)) => {
        $crate::machine::machine_errors::FunctorElement::Constant($e)
    };
    (stub($e:expr)) => {
        $crate::machine::machine_errors::FunctorElement::Stub($e)
    };
    (var()) => {
        $crate::machine::machine_errors::FunctorElement::Var
    };
}

macro_rules! fail_unless {
    ($machine_st:expr, $cond:expr) => {
        if !$cond {
            $machine_st.fail = true;
        }
    };
}
