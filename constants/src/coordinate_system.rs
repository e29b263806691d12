/// Axis transform matrix (row-major: [x_new, y_new, z_new]).
/// Default: identity, tables already arrive in the host's axis convention.
pub const IDENTITY_TRANSFORM: [[f64; 3]; 3] = [
    [1.0, 0.0, 0.0], // X = X
    [0.0, 1.0, 0.0], // Y = Y
    [0.0, 0.0, 1.0], // Z = Z
];

/// Meters per kilometer, the host's default dataset unit.
pub const METERS_IN_KM: f64 = 1000.0;

/// Meters per parsec.
pub const METERS_IN_PC: f64 = 3.085_677_581_491_367_3e16;

/// Apply a row-major 3x3 matrix to a point.
pub fn transform_coordinates(matrix: &[[f64; 3]; 3], x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let input = [x, y, z];
    let mut output = [0.0; 3];

    for i in 0..3 {
        for j in 0..3 {
            output[i] += matrix[i][j] * input[j];
        }
    }

    (output[0], output[1], output[2])
}
