use std::any::Any;
use std::sync::Arc;

/// Conversion to [`Any`] so trait objects can be downcast to their concrete
/// node type. Implemented for anything that's `'static + Send + Sync`.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a shared trait object to a concrete type.
///
/// Dereferences through the `Arc` first; calling `as_any` on the `Arc`
/// itself would yield the `Arc` as the `Any`.
pub fn downcast_arc<T, U>(value: &Arc<U>) -> Option<&T>
where
    T: Any,
    U: AsAny + ?Sized,
{
    (**value).as_any().downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: AsAny {
        fn sides(&self) -> u32;
    }

    struct Square;
    struct Triangle;

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    impl Shape for Triangle {
        fn sides(&self) -> u32 {
            3
        }
    }

    #[test]
    fn test_downcast_through_arc() {
        let shape: Arc<dyn Shape> = Arc::new(Square);
        assert!(downcast_arc::<Square, _>(&shape).is_some());
        assert!(downcast_arc::<Triangle, _>(&shape).is_none());
        assert_eq!(shape.sides(), 4);
    }
}
