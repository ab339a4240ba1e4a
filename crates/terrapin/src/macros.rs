/// Mark the current test as skipped and return from its body.
///
/// ```ignore
/// m.test("needs network", |t, _| -> anyhow::Result<()> {
///     skip!(t, "no network interface available");
/// });
/// ```
#[macro_export]
macro_rules! skip {
    ($scope:expr $(,)?) => {
        return $scope.skip("")
    };
    ($scope:expr, $($arg:tt)+) => {
        return $scope.skip(::std::format_args!($($arg)+))
    };
}

/// Skip the current test when the condition holds.
#[macro_export]
macro_rules! skip_if {
    ($scope:expr, $cond:expr $(,)?) => {
        if $cond {
            $crate::skip!($scope);
        }
    };
    ($scope:expr, $cond:expr, $($arg:tt)+) => {
        if $cond {
            $crate::skip!($scope, $($arg)+);
        }
    };
}

/// Mark the current test as failed and return from its body.
#[macro_export]
macro_rules! fail {
    ($scope:expr $(,)?) => {
        return $scope.fail("explicitly failed")
    };
    ($scope:expr, $($arg:tt)+) => {
        return $scope.fail(::std::format_args!($($arg)+))
    };
}
