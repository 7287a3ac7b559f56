//! Shared, dynamically-typed result values
//!
//! A concluded value is delivered to every waiter of an evaluation, so it is
//! reference counted and type-erased here. The typed API in the runtime
//! crate downcasts at the boundary.

use std::any::Any;
use std::rc::Rc;

use crate::error::Error;

/// A value produced by a procedure body or injected via manual resumption
pub type Value = Rc<dyn Any>;

/// What an evaluation concludes with, or what a suspension primitive
/// returns on resumption
pub type EvalResult = Result<Value, Error>;

/// The value delivered for resumptions that carry no payload
/// (timer fired, descriptor became ready, `resume()` without argument)
#[inline]
pub fn unit_value() -> Value {
    Rc::new(())
}

/// Wrap a concrete value
#[inline]
pub fn value<T: Any>(v: T) -> Value {
    Rc::new(v)
}

/// Retrieve a concrete value, failing if the stored type differs
pub fn downcast<T: Any>(v: Value) -> Result<Rc<T>, Error> {
    v.downcast::<T>().map_err(|_| Error::TypeMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_roundtrip() {
        let v = value(13_i32);
        assert_eq!(*downcast::<i32>(v).unwrap(), 13);
    }

    #[test]
    fn test_downcast_mismatch() {
        let v = value("thirteen");
        assert!(matches!(
            downcast::<i32>(v),
            Err(Error::TypeMismatch)
        ));
    }

    #[test]
    fn test_unit_value() {
        assert!(downcast::<()>(unit_value()).is_ok());
    }
}
