use crate::outcome::Failure;

/// Return values accepted from test bodies and hooks.
pub trait Termination: sealed::Sealed {
    #[doc(hidden)] // private API
    fn exit() -> Self;

    #[doc(hidden)] // private API
    fn into_result(self) -> Result<(), Failure>;
}

impl Termination for () {
    #[doc(hidden)]
    fn exit() -> Self {}

    #[doc(hidden)]
    #[inline]
    fn into_result(self) -> Result<(), Failure> {
        Ok(())
    }
}

impl<E> Termination for Result<(), E>
where
    E: Into<Failure>,
{
    #[doc(hidden)]
    fn exit() -> Self {
        Ok(())
    }

    #[doc(hidden)]
    #[inline]
    fn into_result(self) -> Result<(), Failure> {
        self.map_err(Into::into)
    }
}

mod sealed {
    use crate::outcome::Failure;

    pub trait Sealed {}

    impl Sealed for () {}

    impl<E> Sealed for Result<(), E> where E: Into<Failure> {}
}
